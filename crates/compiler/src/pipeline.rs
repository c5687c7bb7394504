use crate::command::CompilerCommand;
use crate::error::{CompilerError, Result};
use crate::events::{
    CompilationCompletedArgs, CompilationErrorArgs, CompilationStartingArgs,
    ConfigurationLoadedArgs, EventDispatcher, FileLockAcquiredArgs, FileLockFailedArgs,
    FileLockReleasedArgs, Severity, SourceLoadedArgs, SourceLoadingArgs, ValidationArgs,
    ValidationFinding, CODE_VALIDATION_ERROR, CODE_VALIDATION_WARNING,
};
use crate::executor::ChunkExecutor;
use crate::model::{JobSpec, SourceRef};
use crate::options::{ChunkedResult, ChunkingOptions};
use crate::planner::{plan, PlannedChunk};
use crate::scheduler::BatchScheduler;
use crate::util::{count_rules, millis, sha384_hex};
use rules_filelock::{LockHandle, LockManager, LockMode, ReleaseReport};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunking: ChunkingOptions,
    /// Compiler to run; resolved from the environment per chunk when unset
    pub compiler: Option<CompilerCommand>,
    /// Where to write the merged rules
    pub output_path: Option<PathBuf>,
    /// Keep each chunk's output here as `chunk-<n>.txt`
    pub chunk_output_dir: Option<PathBuf>,
    /// Take read locks on local sources for the duration of the run
    pub lock_local_sources: bool,
    pub lock_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingOptions::default(),
            compiler: None,
            output_path: None,
            chunk_output_dir: None,
            lock_local_sources: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl PipelineOptions {
    pub fn new(chunking: ChunkingOptions) -> Self {
        Self {
            chunking,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: CompilerCommand) -> Self {
        self.compiler = Some(compiler);
        self
    }

    #[must_use]
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_chunk_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chunk_output_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn with_source_locks(mut self, enabled: bool) -> Self {
        self.lock_local_sources = enabled;
        self
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// One chunked compilation with checkpoints.
///
/// ```text
/// starting ─> configuration loaded ─> validation
///     ─> per source: loading ─> [read lock] ─> loaded
///     ─> plan ─> waves: chunk started ... chunk completed
///     ─> merging ─> merged ─> [write output] ─> completed
///     ─> locks released
/// ```
///
/// Build one pipeline per run with its handlers registered up front.
pub struct Pipeline {
    events: EventDispatcher,
    locks: LockManager,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(EventDispatcher::new())
    }
}

/// A source that survived the loading checkpoint
struct LoadedSource {
    source: SourceRef,
    estimated_rules: usize,
}

impl Pipeline {
    pub fn new(events: EventDispatcher) -> Self {
        Self {
            events,
            locks: LockManager::new(),
        }
    }

    #[must_use]
    pub fn with_lock_manager(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Run `job` to completion.
    ///
    /// Chunk failures are reported in the returned result. Errors are reserved for the run
    /// itself: cancellation, abort, validation, lock failure, failing fail-fast handlers and
    /// output IO. Every lock taken is released before this returns.
    pub async fn run(&self, job: &JobSpec, options: &PipelineOptions) -> Result<ChunkedResult> {
        let start = Instant::now();
        let mut held = Vec::new();

        let outcome = self.run_stages(job, options, &mut held, start).await;
        self.release_locks(&held).await;

        if let Err(err) = &outcome {
            let mut args = CompilationErrorArgs {
                timestamp: SystemTime::now(),
                error_message: err.to_string(),
                error_code: err.code().to_string(),
                handled: false,
            };
            self.events.raise_compilation_error(&mut args);
            if args.handled {
                log::info!("Compilation error acknowledged by a handler: {err}");
            } else {
                log::error!("Compilation failed: {err}");
            }
        }
        outcome
    }

    async fn run_stages(
        &self,
        job: &JobSpec,
        options: &PipelineOptions,
        held: &mut Vec<LockHandle>,
        start: Instant,
    ) -> Result<ChunkedResult> {
        let mut starting = CompilationStartingArgs::new(job.source_path.clone());
        self.events.raise_compilation_starting(&mut starting)?;
        if starting.cancel {
            let reason = starting
                .cancel_reason
                .unwrap_or_else(|| "cancelled by event handler".to_string());
            return Err(CompilerError::Cancelled(reason));
        }

        self.events
            .raise_configuration_loaded(&ConfigurationLoadedArgs {
                timestamp: SystemTime::now(),
                config_path: job.source_path.clone(),
                name: job.name.clone(),
                source_count: job.sources.len(),
            })?;

        self.validate(job)?;

        let loaded = self.load_sources(job, options, held).await?;
        let estimates: Vec<usize> = loaded.iter().map(|l| l.estimated_rules).collect();
        let job = job.derive_with_sources(
            job.name.clone(),
            loaded.into_iter().map(|l| l.source).collect(),
        );

        let mut chunks = plan(&job, &options.chunking);
        attach_estimates(&mut chunks, &estimates);

        let mut executor = ChunkExecutor::new(options.chunking.timeout);
        if let Some(command) = &options.compiler {
            executor = executor.with_command(command.clone());
        }
        if let Some(dir) = job.base_dir() {
            executor = executor.with_working_dir(dir);
        }
        if let Some(dir) = &options.chunk_output_dir {
            executor = executor.with_output_dir(dir);
        }
        let scheduler = BatchScheduler::new(executor, options.chunking.max_parallel);
        let mut result = scheduler.run_with_events(chunks, &self.events).await?;

        let text = merged_text(result.merged_rules.as_deref().unwrap_or_default());
        if let Some(path) = &options.output_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &text).await?;
            log::info!("Wrote {} rules to {}", result.final_rule_count, path.display());
        }

        result.total_elapsed_ms = millis(start.elapsed());
        self.events
            .raise_compilation_completed(&CompilationCompletedArgs {
                timestamp: SystemTime::now(),
                rule_count: result.final_rule_count,
                output_path: options.output_path.clone(),
                duration_ms: result.total_elapsed_ms,
                content_hash: Some(sha384_hex(text.as_bytes())),
            });
        Ok(result)
    }

    fn validate(&self, job: &JobSpec) -> Result<()> {
        let started = Instant::now();
        let report = job.validate(true);

        let mut args = ValidationArgs::new("configuration");
        args.items_validated = job.sources.len() + 1;
        for message in &report.errors {
            args.add_finding(
                ValidationFinding::new(Severity::Error, CODE_VALIDATION_ERROR, message)
                    .at(job_location(job)),
            );
        }
        for message in &report.warnings {
            args.add_finding(
                ValidationFinding::new(Severity::Warning, CODE_VALIDATION_WARNING, message)
                    .at(job_location(job)),
            );
        }
        args.duration_ms = millis(started.elapsed());

        self.events.raise_validation(&mut args)?;
        if args.abort {
            let reason = args
                .abort_reason
                .unwrap_or_else(|| "aborted by event handler".to_string());
            return Err(CompilerError::aborted(args.stage_name, reason));
        }

        let warnings = args.messages(Severity::Warning);
        for warning in &warnings {
            log::warn!("Configuration warning: {warning}");
        }
        if !args.passed() {
            let errors = args
                .findings
                .iter()
                .filter(|f| f.severity.is_failure())
                .map(|f| f.message.clone())
                .collect();
            return Err(CompilerError::Validation { errors, warnings });
        }
        Ok(())
    }

    async fn load_sources(
        &self,
        job: &JobSpec,
        options: &PipelineOptions,
        held: &mut Vec<LockHandle>,
    ) -> Result<Vec<LoadedSource>> {
        let total = job.sources.len();
        let mut loaded = Vec::with_capacity(total);

        for (index, source) in job.sources.iter().enumerate() {
            let name = Some(source.name.clone()).filter(|n| !n.trim().is_empty());
            let mut loading = SourceLoadingArgs {
                timestamp: SystemTime::now(),
                source_index: index,
                total_sources: total,
                url: source.locator.clone(),
                name: name.clone(),
                is_local_file: source.is_local(),
                skip: false,
                skip_reason: None,
            };
            self.events.raise_source_loading(&mut loading)?;
            if loading.skip {
                log::info!(
                    "Skipping source {}/{total} {}: {}",
                    index + 1,
                    source.display_name(),
                    loading.skip_reason.as_deref().unwrap_or("skipped by event handler")
                );
                continue;
            }

            let started = Instant::now();
            let mut args = SourceLoadedArgs {
                timestamp: SystemTime::now(),
                source_index: index,
                total_sources: total,
                url: source.locator.clone(),
                name,
                success: true,
                error_message: None,
                content_size_bytes: 0,
                estimated_rule_count: 0,
                load_duration_ms: 0,
                content_hash: None,
            };

            if source.is_local() {
                let path = job.resolve_local(source);
                if options.lock_local_sources {
                    if let Some(handle) = self.lock_source(&path, options).await? {
                        args.content_hash = handle.content_hash().map(str::to_string);
                        held.push(handle);
                    }
                }
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        args.content_size_bytes = bytes.len() as u64;
                        args.estimated_rule_count =
                            count_rules(String::from_utf8_lossy(&bytes).lines());
                    }
                    Err(err) => {
                        log::warn!("Could not read local source {}: {err}", path.display());
                        args.success = false;
                        args.error_message = Some(err.to_string());
                    }
                }
            }
            args.load_duration_ms = millis(started.elapsed());
            self.events.raise_source_loaded(&args);

            loaded.push(LoadedSource {
                source: source.clone(),
                estimated_rules: args.estimated_rule_count,
            });
        }
        Ok(loaded)
    }

    /// `Ok(None)` when locking failed and a handler chose to continue without the lock.
    async fn lock_source(
        &self,
        path: &std::path::Path,
        options: &PipelineOptions,
    ) -> Result<Option<LockHandle>> {
        match self
            .locks
            .acquire_read(path, true, options.lock_timeout)
            .await
        {
            Ok(handle) => {
                self.events.raise_file_lock_acquired(&FileLockAcquiredArgs {
                    timestamp: SystemTime::now(),
                    path: handle.path().to_path_buf(),
                    lock_type: handle.mode(),
                    lock_id: handle.id().to_string(),
                    content_hash: handle.content_hash().map(str::to_string),
                });
                Ok(Some(handle))
            }
            Err(err) => {
                let mut args = FileLockFailedArgs {
                    timestamp: SystemTime::now(),
                    path: path.to_path_buf(),
                    lock_type: LockMode::Read,
                    reason: err.to_string(),
                    continue_without_lock: false,
                };
                self.events.raise_file_lock_failed(&mut args);
                if args.continue_without_lock {
                    log::warn!(
                        "Continuing without lock on {}: {err}",
                        path.display()
                    );
                    Ok(None)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn release_locks(&self, held: &[LockHandle]) {
        for handle in held {
            match self.locks.release(handle).await {
                Ok(Some(report)) => self.raise_released(&report),
                Ok(None) => {}
                Err(err) => log::warn!("Error releasing lock {}: {err}", handle.id()),
            }
        }
        for report in self.locks.release_all().await {
            self.raise_released(&report);
        }
    }

    fn raise_released(&self, report: &ReleaseReport) {
        self.events.raise_file_lock_released(&FileLockReleasedArgs {
            timestamp: SystemTime::now(),
            path: report.path.clone(),
            lock_id: report.lock_id.clone(),
            lock_duration_ms: report.held_ms,
            was_modified: report.was_modified,
            hash_before: report.hash_before.clone(),
            hash_after: report.hash_after.clone(),
        });
    }
}

fn job_location(job: &JobSpec) -> String {
    job.source_path
        .as_ref()
        .map_or_else(|| job.name.clone(), |p| p.display().to_string())
}

/// Chunk estimate is the sum of its sources' estimates; chunks are contiguous.
fn attach_estimates(chunks: &mut [PlannedChunk], estimates: &[usize]) {
    let mut offset = 0;
    for chunk in chunks {
        let count = chunk.metadata.sources().len();
        let estimate = estimates
            .get(offset..offset + count)
            .map_or(0, |slice| slice.iter().sum());
        offset += count;
        chunk.metadata = chunk.metadata.clone().with_estimated_rules(estimate);
    }
}

/// Merged lines as file content, newline-terminated
pub(crate) fn merged_text(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ChunkMetadata;

    #[test]
    fn estimates_follow_contiguous_sources() {
        let sources: Vec<SourceRef> = (0..5)
            .map(|i| SourceRef::new(format!("s{i}"), format!("{i}.txt")))
            .collect();
        let mut chunks: Vec<PlannedChunk> = sources
            .chunks(2)
            .enumerate()
            .map(|(i, group)| PlannedChunk {
                job: JobSpec::new("x"),
                metadata: ChunkMetadata::new(i, 3, group.to_vec()),
            })
            .collect();

        attach_estimates(&mut chunks, &[1, 2, 3, 4, 5]);
        let estimates: Vec<usize> = chunks.iter().map(|c| c.metadata.estimated_rules()).collect();
        assert_eq!(estimates, vec![3, 7, 5]);
    }

    #[test]
    fn merged_text_ends_with_newline() {
        assert_eq!(merged_text(&[]), "");
        assert_eq!(merged_text(&["a".to_string(), "b".to_string()]), "a\nb\n");
    }
}
