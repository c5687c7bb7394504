use crate::error::Result;
use crate::events::{
    ChunkCompletedArgs, ChunkStartedArgs, ChunksMergedArgs, ChunksMergingArgs, EventDispatcher,
};
use crate::executor::ChunkExecutor;
use crate::merger::merge_chunks;
use crate::options::{ChunkMetadata, ChunkedResult};
use crate::planner::PlannedChunk;
use crate::util::{count_rules, millis};
use std::time::{Instant, SystemTime};
use tokio::task::JoinHandle;

/// Runs planned chunks in waves of at most `max_parallel`.
///
/// Every chunk of a wave is launched before any is awaited, and the next wave starts only after
/// the whole wave has settled. A failed chunk never cancels its siblings.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    executor: ChunkExecutor,
    max_parallel: usize,
}

struct Settled {
    metadata: ChunkMetadata,
    lines: Option<Vec<String>>,
}

impl BatchScheduler {
    pub fn new(executor: ChunkExecutor, max_parallel: usize) -> Self {
        Self {
            executor,
            max_parallel: max_parallel.max(1),
        }
    }

    pub const fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute and merge without observers.
    pub async fn run(&self, chunks: Vec<PlannedChunk>) -> ChunkedResult {
        let start = Instant::now();
        match self.run_with_events(chunks, &EventDispatcher::new()).await {
            Ok(result) => result,
            // No handlers, so no fail-fast checkpoint can fail.
            Err(err) => ChunkedResult {
                total_elapsed_ms: millis(start.elapsed()),
                errors: vec![err.to_string()],
                ..Default::default()
            },
        }
    }

    /// Execute and merge, raising chunk and merge events on `events`.
    ///
    /// Errors only come from fail-fast handlers (`chunk_started`, `chunks_merging`); chunk
    /// failures are recorded in the result.
    pub async fn run_with_events(
        &self,
        chunks: Vec<PlannedChunk>,
        events: &EventDispatcher,
    ) -> Result<ChunkedResult> {
        let start = Instant::now();
        let total = chunks.len();
        let total_waves = total.div_ceil(self.max_parallel);
        log::info!(
            "Compiling {total} chunks with max {} parallel workers",
            self.max_parallel
        );

        let mut settled: Vec<Settled> = Vec::with_capacity(total);
        let mut pending = chunks.into_iter().peekable();
        let mut wave_no = 0;
        while pending.peek().is_some() {
            wave_no += 1;
            let wave: Vec<PlannedChunk> = pending.by_ref().take(self.max_parallel).collect();
            log::info!(
                "Processing batch {wave_no}/{total_waves} (chunks {}-{})",
                wave.first().map_or(0, |c| c.metadata.number()),
                wave.last().map_or(0, |c| c.metadata.number())
            );

            let mut wave_results = self.run_wave(wave, events).await?;
            wave_results.sort_by_key(|s| s.metadata.index());
            for done in &wave_results {
                raise_completed(events, &done.metadata);
            }
            settled.extend(wave_results);
        }
        settled.sort_by_key(|s| s.metadata.index());

        let mut result = ChunkedResult::default();
        let mut outputs = Vec::new();
        for done in settled {
            let meta = &done.metadata;
            if !meta.success() && !meta.is_skipped() {
                let message = meta.error_message().unwrap_or("unknown error");
                result.errors.push(format!("Chunk {}: {message}", meta.number()));
            }
            if let Some(lines) = done.lines {
                outputs.push(lines);
            }
            result.chunks.push(done.metadata);
        }
        result.total_rules_observed = result
            .chunks
            .iter()
            .filter_map(ChunkMetadata::actual_rules)
            .sum();

        if !outputs.is_empty() {
            merge_stage(&mut result, &outputs, events)?;
        }

        result.total_elapsed_ms = millis(start.elapsed());
        result.success = result.errors.is_empty();
        log::info!(
            "Chunked compilation complete: {} rules (removed {} duplicates) in {}ms",
            result.final_rule_count,
            result.duplicates_removed,
            result.total_elapsed_ms
        );
        let speedup = result.estimated_speedup();
        if speedup > 1.0 {
            log::info!("Estimated speedup: {speedup:.2}x");
        }
        Ok(result)
    }

    async fn run_wave(
        &self,
        wave: Vec<PlannedChunk>,
        events: &EventDispatcher,
    ) -> Result<Vec<Settled>> {
        let mut settled = Vec::with_capacity(wave.len());
        let mut running: Vec<(ChunkMetadata, JoinHandle<(Vec<String>, ChunkMetadata)>)> =
            Vec::with_capacity(wave.len());

        for PlannedChunk { job, mut metadata } in wave {
            let mut args = ChunkStartedArgs {
                timestamp: SystemTime::now(),
                chunk_index: metadata.index(),
                total_chunks: metadata.total(),
                source_count: metadata.sources().len(),
                estimated_rules: metadata.estimated_rules(),
                skip: false,
                skip_reason: None,
            };
            if let Err(err) = events.raise_chunk_started(&mut args) {
                for (_, handle) in &running {
                    handle.abort();
                }
                return Err(err);
            }
            if args.skip {
                let reason = args.skip_reason.as_deref().unwrap_or("skipped by event handler");
                log::info!(
                    "Chunk {}/{} skipped: {reason}",
                    metadata.number(),
                    metadata.total()
                );
                metadata.mark_skipped(reason);
                settled.push(Settled {
                    metadata,
                    lines: None,
                });
                continue;
            }

            let executor = self.executor.clone();
            let fallback = metadata.clone();
            let handle = tokio::spawn(async move { executor.execute(job, metadata).await });
            running.push((fallback, handle));
        }

        // Barrier: every task of the wave settles before any result is read.
        for (mut fallback, handle) in running {
            match handle.await {
                Ok((lines, metadata)) => {
                    let lines = metadata.success().then_some(lines);
                    settled.push(Settled { metadata, lines });
                }
                Err(err) => {
                    log::error!(
                        "Chunk {}/{} task failed: {err}",
                        fallback.number(),
                        fallback.total()
                    );
                    fallback.mark_failed(format!("chunk task failed: {err}"), 0);
                    settled.push(Settled {
                        metadata: fallback,
                        lines: None,
                    });
                }
            }
        }
        Ok(settled)
    }
}

fn raise_completed(events: &EventDispatcher, meta: &ChunkMetadata) {
    events.raise_chunk_completed(&ChunkCompletedArgs {
        timestamp: SystemTime::now(),
        chunk_index: meta.index(),
        total_chunks: meta.total(),
        success: meta.success(),
        error_message: meta.error_message().map(str::to_string),
        rule_count: meta.actual_rules().unwrap_or(0),
        duration_ms: meta.elapsed_ms().unwrap_or(0),
    });
}

fn merge_stage(
    result: &mut ChunkedResult,
    outputs: &[Vec<String>],
    events: &EventDispatcher,
) -> Result<()> {
    let rules_before_merge: usize = outputs
        .iter()
        .map(|lines| count_rules(lines.iter().map(String::as_str)))
        .sum();
    events.raise_chunks_merging(&ChunksMergingArgs {
        timestamp: SystemTime::now(),
        chunk_count: outputs.len(),
        rules_before_merge,
    })?;

    let merge_start = Instant::now();
    let (merged, duplicates_removed) = merge_chunks(outputs);
    result.final_rule_count = count_rules(merged.iter().map(String::as_str));
    result.duplicates_removed = duplicates_removed;
    result.merged_rules = Some(merged);

    events.raise_chunks_merged(&ChunksMergedArgs {
        timestamp: SystemTime::now(),
        chunk_count: outputs.len(),
        rules_before_merge,
        final_rule_count: result.final_rule_count,
        duplicates_removed,
        duration_ms: millis(merge_start.elapsed()),
    });
    Ok(())
}
