use crate::limits::{chunk_timeout_from_env, clamp_max_parallel, max_parallel_from_env};
use crate::model::{JobSpec, SourceRef};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// How sources are distributed across chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkingStrategy {
    #[default]
    BySource,
    /// Reserved; planned as [`ChunkingStrategy::BySource`].
    ByLineCount,
}

impl ChunkingStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BySource => "source",
            Self::ByLineCount => "line_count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingOptions {
    pub enabled: bool,
    /// Target rules per chunk, used for speedup estimates
    pub chunk_size: usize,
    /// Chunks compiled concurrently per wave, at least 1
    pub max_parallel: usize,
    pub strategy: ChunkingStrategy,
    /// Wall-clock budget for each compiler invocation
    pub timeout: Duration,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallel: max_parallel_from_env(),
            strategy: ChunkingStrategy::BySource,
            timeout: chunk_timeout_from_env(),
        }
    }
}

impl ChunkingOptions {
    /// Chunking on, with at least two parallel chunks.
    pub fn for_large_lists() -> Self {
        let defaults = Self::default();
        Self {
            enabled: true,
            max_parallel: defaults.max_parallel.max(2),
            ..defaults
        }
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = clamp_max_parallel(max_parallel);
        self
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: ChunkingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn effective_parallel(&self) -> usize {
        self.max_parallel.max(1)
    }
}

/// Per-chunk bookkeeping.
///
/// The planner fills in identity and sources; the outcome is written once by
/// [`ChunkMetadata::mark_succeeded`], [`ChunkMetadata::mark_failed`] or
/// [`ChunkMetadata::mark_skipped`]. Later writes are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    index: usize,
    total: usize,
    estimated_rules: usize,
    sources: Vec<SourceRef>,
    actual_rules: Option<usize>,
    elapsed_ms: Option<u64>,
    success: bool,
    error_message: Option<String>,
    output_location: Option<PathBuf>,
    skipped: bool,
    settled: bool,
}

impl ChunkMetadata {
    pub fn new(index: usize, total: usize, sources: Vec<SourceRef>) -> Self {
        Self {
            index,
            total,
            estimated_rules: 0,
            sources,
            actual_rules: None,
            elapsed_ms: None,
            success: false,
            error_message: None,
            output_location: None,
            skipped: false,
            settled: false,
        }
    }

    #[must_use]
    pub const fn with_estimated_rules(mut self, estimated_rules: usize) -> Self {
        self.estimated_rules = estimated_rules;
        self
    }

    /// Zero-based position in the plan
    pub const fn index(&self) -> usize {
        self.index
    }

    /// One-based position, for messages
    pub const fn number(&self) -> usize {
        self.index + 1
    }

    pub const fn total(&self) -> usize {
        self.total
    }

    pub const fn estimated_rules(&self) -> usize {
        self.estimated_rules
    }

    pub fn sources(&self) -> &[SourceRef] {
        &self.sources
    }

    pub const fn actual_rules(&self) -> Option<usize> {
        self.actual_rules
    }

    pub const fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms
    }

    pub const fn success(&self) -> bool {
        self.success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Kept copy of the chunk's output; only set when the executor has an output directory.
    pub fn output_location(&self) -> Option<&Path> {
        self.output_location.as_deref()
    }

    pub const fn is_settled(&self) -> bool {
        self.settled
    }

    pub const fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub(crate) fn mark_succeeded(
        &mut self,
        actual_rules: usize,
        elapsed_ms: u64,
        output_location: Option<PathBuf>,
    ) {
        if self.guard_settled() {
            return;
        }
        self.success = true;
        self.actual_rules = Some(actual_rules);
        self.elapsed_ms = Some(elapsed_ms);
        self.output_location = output_location;
    }

    pub(crate) fn mark_failed(&mut self, message: impl Into<String>, elapsed_ms: u64) {
        if self.guard_settled() {
            return;
        }
        self.success = false;
        self.elapsed_ms = Some(elapsed_ms);
        self.error_message = Some(message.into());
    }

    pub(crate) fn mark_skipped(&mut self, reason: &str) {
        if self.guard_settled() {
            return;
        }
        self.success = false;
        self.skipped = true;
        self.error_message = Some(format!("{SKIPPED_PREFIX} {reason}"));
    }

    /// Returns true when the outcome was already written.
    fn guard_settled(&mut self) -> bool {
        if self.settled {
            log::warn!(
                "Chunk {}/{} outcome already recorded; ignoring second write",
                self.number(),
                self.total
            );
            return true;
        }
        self.settled = true;
        false
    }
}

pub(crate) const SKIPPED_PREFIX: &str = "Skipped:";

/// Outcome of a chunked run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedResult {
    pub success: bool,
    pub total_elapsed_ms: u64,
    /// In plan order
    pub chunks: Vec<ChunkMetadata>,
    pub total_rules_observed: usize,
    pub final_rule_count: usize,
    pub duplicates_removed: usize,
    pub merged_rules: Option<Vec<String>>,
    /// One entry per failed chunk, in plan order
    pub errors: Vec<String>,
}

impl ChunkedResult {
    /// Sum of chunk times over wall time; 1.0 when there is nothing to compare.
    #[allow(clippy::cast_precision_loss)]
    pub fn estimated_speedup(&self) -> f64 {
        if self.chunks.is_empty() || self.total_elapsed_ms == 0 {
            return 1.0;
        }
        let chunk_time: u64 = self.chunks.iter().filter_map(ChunkMetadata::elapsed_ms).sum();
        chunk_time as f64 / self.total_elapsed_ms as f64
    }

    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkMetadata> {
        self.chunks
            .iter()
            .filter(|c| !c.success() && !c.is_skipped())
    }

    pub fn skipped_chunks(&self) -> impl Iterator<Item = &ChunkMetadata> {
        self.chunks.iter().filter(|c| c.is_skipped())
    }
}

/// Whether `job` should be compiled in chunks.
///
/// Never with no sources; explicit options win; otherwise chunk when there is more than one
/// source.
pub fn should_enable_chunking(job: &JobSpec, options: Option<&ChunkingOptions>) -> bool {
    if job.sources.is_empty() {
        return false;
    }
    match options {
        Some(options) => options.enabled,
        None => job.sources.len() > 1,
    }
}

/// Theoretical speedup of chunking `total_rules` rules: `min(chunks, max_parallel)`.
#[allow(clippy::cast_precision_loss)]
pub fn estimate_speedup(total_rules: usize, options: &ChunkingOptions) -> f64 {
    if !options.enabled || total_rules == 0 {
        return 1.0;
    }
    let chunks = total_rules.div_ceil(options.chunk_size.max(1));
    chunks.min(options.effective_parallel()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_outcome_is_written_once() {
        let mut meta = ChunkMetadata::new(0, 2, Vec::new());
        assert!(!meta.success());
        meta.mark_failed("boom", 12);
        meta.mark_skipped("late");
        meta.mark_succeeded(10, 20, Some(PathBuf::from("out.txt")));
        assert!(!meta.is_skipped());
        assert!(!meta.success());
        assert_eq!(meta.error_message(), Some("boom"));
        assert_eq!(meta.elapsed_ms(), Some(12));
        assert_eq!(meta.actual_rules(), None);
    }

    #[test]
    fn skipped_chunks_are_recognised() {
        let mut meta = ChunkMetadata::new(1, 2, Vec::new());
        meta.mark_skipped("maintenance window");
        assert!(meta.is_skipped());
        assert_eq!(meta.error_message(), Some("Skipped: maintenance window"));

        let result = ChunkedResult {
            chunks: vec![meta],
            ..Default::default()
        };
        assert_eq!(result.skipped_chunks().count(), 1);
        assert_eq!(result.failed_chunks().count(), 0);
    }

    #[test]
    fn failure_message_with_skip_prefix_is_still_a_failure() {
        let mut meta = ChunkMetadata::new(0, 1, Vec::new());
        meta.mark_failed("Skipped: looks like a skip", 5);
        assert!(!meta.is_skipped());

        let result = ChunkedResult {
            chunks: vec![meta],
            ..Default::default()
        };
        assert_eq!(result.failed_chunks().count(), 1);
        assert_eq!(result.skipped_chunks().count(), 0);
    }

    #[test]
    fn chunking_decision() {
        let empty = JobSpec::new("x");
        let one = JobSpec::new("x").with_source(SourceRef::new("a", "a.txt"));
        let two = one.clone().with_source(SourceRef::new("b", "b.txt"));
        let on = ChunkingOptions::default().with_enabled(true);
        let off = ChunkingOptions::default();

        assert!(!should_enable_chunking(&empty, Some(&on)));
        assert!(should_enable_chunking(&one, Some(&on)));
        assert!(!should_enable_chunking(&two, Some(&off)));
        assert!(!should_enable_chunking(&one, None));
        assert!(should_enable_chunking(&two, None));
    }

    #[test]
    fn speedup_estimates() {
        let options = ChunkingOptions::default()
            .with_enabled(true)
            .with_chunk_size(100)
            .with_max_parallel(4);
        assert_eq!(estimate_speedup(0, &options), 1.0);
        assert_eq!(estimate_speedup(250, &options), 3.0);
        assert_eq!(estimate_speedup(10_000, &options), 4.0);
        assert_eq!(estimate_speedup(10_000, &options.clone().with_enabled(false)), 1.0);

        let mut a = ChunkMetadata::new(0, 2, Vec::new());
        a.mark_succeeded(1, 300, None);
        let mut b = ChunkMetadata::new(1, 2, Vec::new());
        b.mark_failed("x", 100);
        let result = ChunkedResult {
            total_elapsed_ms: 200,
            chunks: vec![a, b],
            ..Default::default()
        };
        assert!((result.estimated_speedup() - 2.0).abs() < f64::EPSILON);
        assert_eq!(ChunkedResult::default().estimated_speedup(), 1.0);
    }
}
