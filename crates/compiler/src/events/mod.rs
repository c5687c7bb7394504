//! Checkpoint events raised during a run, and the handlers that observe them.

mod args;
mod dispatcher;
mod handler;

pub use args::{
    ChunkCompletedArgs, ChunkStartedArgs, ChunksMergedArgs, ChunksMergingArgs,
    CompilationCompletedArgs, CompilationErrorArgs, CompilationStartingArgs,
    ConfigurationLoadedArgs, FileLockAcquiredArgs, FileLockFailedArgs, FileLockReleasedArgs,
    Severity, SourceLoadedArgs, SourceLoadingArgs, ValidationArgs, ValidationFinding,
    CODE_VALIDATION_ERROR, CODE_VALIDATION_WARNING,
};
pub use dispatcher::EventDispatcher;
pub use handler::{CompilationEventHandler, LoggingHandler};
