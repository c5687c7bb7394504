use crate::LockMode;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Errors raised while acquiring, hashing or releasing file locks
#[derive(Error, Debug)]
pub enum LockError {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file to lock does not exist
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The lock could not be taken before the deadline
    #[error("Timeout acquiring {mode} lock on {} after {waited_ms}ms", .path.display())]
    Timeout {
        path: PathBuf,
        mode: LockMode,
        waited_ms: u64,
    },

    /// The platform refused the lock for a reason other than contention
    #[error("Failed to lock {}: {reason}", .path.display())]
    Failed { path: PathBuf, reason: String },
}

impl LockError {
    pub fn failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Failed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from waiting out the deadline
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
