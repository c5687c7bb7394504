use super::args::{
    ChunkCompletedArgs, ChunkStartedArgs, ChunksMergedArgs, ChunksMergingArgs,
    CompilationCompletedArgs, CompilationErrorArgs, CompilationStartingArgs,
    ConfigurationLoadedArgs, FileLockAcquiredArgs, FileLockFailedArgs, FileLockReleasedArgs,
    SourceLoadedArgs, SourceLoadingArgs, ValidationArgs,
};
use super::handler::CompilationEventHandler;
use crate::error::{CompilerError, Result};
use std::sync::Arc;

type Handler = Arc<dyn CompilationEventHandler>;

/// Ordered list of handlers for one run.
///
/// Fail-fast `raise_*` methods return the first handler error as [`CompilerError::Handler`] and
/// stop at the first handler that sets a halting flag; the caller reads the flag from the args.
/// Best-effort methods log handler errors and keep going.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Handler>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn CompilationEventHandler>) {
        log::debug!("Registered event handler {}", handler.name());
        self.handlers.push(handler);
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn CompilationEventHandler>) -> Self {
        self.add_handler(handler);
        self
    }

    /// Remove a previously added handler. Returns whether it was registered.
    pub fn remove_handler(&mut self, handler: &Arc<dyn CompilationEventHandler>) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        before != self.handlers.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// `call` returns whether the handler set a halting flag.
    fn fail_fast(
        &self,
        event: &'static str,
        mut call: impl FnMut(&dyn CompilationEventHandler) -> anyhow::Result<bool>,
    ) -> Result<()> {
        for handler in &self.handlers {
            log::debug!("Dispatching {event} to {}", handler.name());
            let halted = call(handler.as_ref()).map_err(|err| {
                log::error!("Handler {} failed during {event}: {err:#}", handler.name());
                CompilerError::Handler {
                    event: event.to_string(),
                    message: format!("{err:#}"),
                }
            })?;
            if halted {
                log::debug!("{event} halted by {}", handler.name());
                break;
            }
        }
        Ok(())
    }

    fn best_effort(
        &self,
        event: &'static str,
        mut call: impl FnMut(&dyn CompilationEventHandler) -> anyhow::Result<()>,
    ) {
        for handler in &self.handlers {
            log::debug!("Dispatching {event} to {}", handler.name());
            if let Err(err) = call(handler.as_ref()) {
                log::error!("Handler {} failed during {event}: {err:#}", handler.name());
            }
        }
    }

    pub fn raise_compilation_starting(&self, args: &mut CompilationStartingArgs) -> Result<()> {
        self.fail_fast("compilation_starting", |h| {
            h.on_compilation_starting(args)?;
            Ok(args.cancel)
        })
    }

    pub fn raise_configuration_loaded(&self, args: &ConfigurationLoadedArgs) -> Result<()> {
        self.fail_fast("configuration_loaded", |h| {
            h.on_configuration_loaded(args)?;
            Ok(false)
        })
    }

    pub fn raise_validation(&self, args: &mut ValidationArgs) -> Result<()> {
        self.fail_fast("validation", |h| {
            h.on_validation(args)?;
            Ok(args.abort)
        })
    }

    pub fn raise_source_loading(&self, args: &mut SourceLoadingArgs) -> Result<()> {
        self.fail_fast("source_loading", |h| {
            h.on_source_loading(args)?;
            Ok(args.skip)
        })
    }

    pub fn raise_chunk_started(&self, args: &mut ChunkStartedArgs) -> Result<()> {
        self.fail_fast("chunk_started", |h| {
            h.on_chunk_started(args)?;
            Ok(args.skip)
        })
    }

    pub fn raise_chunks_merging(&self, args: &ChunksMergingArgs) -> Result<()> {
        self.fail_fast("chunks_merging", |h| {
            h.on_chunks_merging(args)?;
            Ok(false)
        })
    }

    pub fn raise_source_loaded(&self, args: &SourceLoadedArgs) {
        self.best_effort("source_loaded", |h| h.on_source_loaded(args));
    }

    pub fn raise_file_lock_acquired(&self, args: &FileLockAcquiredArgs) {
        self.best_effort("file_lock_acquired", |h| h.on_file_lock_acquired(args));
    }

    pub fn raise_file_lock_released(&self, args: &FileLockReleasedArgs) {
        self.best_effort("file_lock_released", |h| h.on_file_lock_released(args));
    }

    /// Best-effort; a handler may still set `continue_without_lock`.
    pub fn raise_file_lock_failed(&self, args: &mut FileLockFailedArgs) {
        self.best_effort("file_lock_failed", |h| h.on_file_lock_failed(args));
    }

    pub fn raise_chunk_completed(&self, args: &ChunkCompletedArgs) {
        self.best_effort("chunk_completed", |h| h.on_chunk_completed(args));
    }

    pub fn raise_chunks_merged(&self, args: &ChunksMergedArgs) {
        self.best_effort("chunks_merged", |h| h.on_chunks_merged(args));
    }

    pub fn raise_compilation_completed(&self, args: &CompilationCompletedArgs) {
        self.best_effort("compilation_completed", |h| {
            h.on_compilation_completed(args)
        });
    }

    pub fn raise_compilation_error(&self, args: &mut CompilationErrorArgs) {
        self.best_effort("compilation_error", |h| h.on_compilation_error(args));
    }
}
