use super::args::{
    ChunkCompletedArgs, ChunkStartedArgs, ChunksMergedArgs, ChunksMergingArgs,
    CompilationCompletedArgs, CompilationErrorArgs, CompilationStartingArgs,
    ConfigurationLoadedArgs, FileLockAcquiredArgs, FileLockFailedArgs, FileLockReleasedArgs,
    SourceLoadedArgs, SourceLoadingArgs, ValidationArgs,
};

/// Observer of a compilation run.
///
/// Every method has a no-op default, so a handler implements only the checkpoints it cares
/// about. Methods taking `&mut` args may set the flags those args expose (`cancel`, `abort`,
/// `skip`, `continue_without_lock`, `handled`).
///
/// Returning an error from a fail-fast checkpoint (starting, configuration loaded, validation,
/// source loading, chunk started, chunks merging) halts the run. Errors from the remaining
/// checkpoints are logged and ignored.
pub trait CompilationEventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_compilation_starting(&self, _args: &mut CompilationStartingArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_configuration_loaded(&self, _args: &ConfigurationLoadedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_validation(&self, _args: &mut ValidationArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_source_loading(&self, _args: &mut SourceLoadingArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_source_loaded(&self, _args: &SourceLoadedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_file_lock_acquired(&self, _args: &FileLockAcquiredArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_file_lock_released(&self, _args: &FileLockReleasedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_file_lock_failed(&self, _args: &mut FileLockFailedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_chunk_started(&self, _args: &mut ChunkStartedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_chunk_completed(&self, _args: &ChunkCompletedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_chunks_merging(&self, _args: &ChunksMergingArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_chunks_merged(&self, _args: &ChunksMergedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_compilation_completed(&self, _args: &CompilationCompletedArgs) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_compilation_error(&self, _args: &mut CompilationErrorArgs) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs every checkpoint at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl CompilationEventHandler for LoggingHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_compilation_starting(&self, args: &mut CompilationStartingArgs) -> anyhow::Result<()> {
        log::debug!("compilation starting (config: {:?})", args.config_path);
        Ok(())
    }

    fn on_validation(&self, args: &mut ValidationArgs) -> anyhow::Result<()> {
        for finding in &args.findings {
            log::debug!("{} validation: {finding}", args.stage_name);
        }
        Ok(())
    }

    fn on_source_loaded(&self, args: &SourceLoadedArgs) -> anyhow::Result<()> {
        log::debug!(
            "source {}/{} loaded: {} ({} bytes, ~{} rules)",
            args.source_index + 1,
            args.total_sources,
            args.url,
            args.content_size_bytes,
            args.estimated_rule_count
        );
        Ok(())
    }

    fn on_chunk_completed(&self, args: &ChunkCompletedArgs) -> anyhow::Result<()> {
        log::debug!(
            "chunk {}/{} done: success={} rules={} in {}ms",
            args.chunk_index + 1,
            args.total_chunks,
            args.success,
            args.rule_count,
            args.duration_ms
        );
        Ok(())
    }

    fn on_chunks_merged(&self, args: &ChunksMergedArgs) -> anyhow::Result<()> {
        log::debug!(
            "merged {} chunks: {} -> {} rules",
            args.chunk_count,
            args.rules_before_merge,
            args.final_rule_count
        );
        Ok(())
    }

    fn on_compilation_completed(&self, args: &CompilationCompletedArgs) -> anyhow::Result<()> {
        log::debug!(
            "compilation completed: {} rules in {}ms",
            args.rule_count,
            args.duration_ms
        );
        Ok(())
    }
}
