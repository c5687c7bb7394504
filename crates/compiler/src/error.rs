use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Stable error codes, surfaced to event handlers and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    UnknownExtension,
    ParseError,
    ValidationFailed,
    CompilerNotFound,
    CompilationFailed,
    OutputNotCreated,
    CopyFailed,
    TimeoutError,
    LockFailed,
    FileSystemError,
    Cancelled,
    Aborted,
    HandlerFailed,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigNotFound => "CONFIG_NOT_FOUND",
            Self::UnknownExtension => "UNKNOWN_EXTENSION",
            Self::ParseError => "PARSE_ERROR",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::CompilerNotFound => "COMPILER_NOT_FOUND",
            Self::CompilationFailed => "COMPILATION_FAILED",
            Self::OutputNotCreated => "OUTPUT_NOT_CREATED",
            Self::CopyFailed => "COPY_FAILED",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::LockFailed => "LOCK_FAILED",
            Self::FileSystemError => "FILE_SYSTEM_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Aborted => "ABORTED",
            Self::HandlerFailed => "HANDLER_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while loading, planning or compiling a job
#[derive(Error, Debug)]
pub enum CompilerError {
    /// Job file does not exist
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    /// Job file extension is not json/yaml/yml/toml
    #[error("Unknown configuration file extension: {0:?}. Supported: .json, .yaml, .yml, .toml")]
    UnknownFormat(String),

    /// Job file could not be deserialized
    #[error("Invalid {format}: {message}")]
    Parse { format: String, message: String },

    /// Job failed validation
    #[error("Configuration validation failed: {}", .errors.join("; "))]
    Validation {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    /// Neither an explicit compiler nor one on PATH was found
    #[error(
        "hostlist-compiler not found (searched: {}). Install with: npm install -g @adguard/hostlist-compiler",
        .searched.join(", ")
    )]
    CompilerUnavailable { searched: Vec<String> },

    /// The compiler exited with a non-zero status
    #[error("Compilation failed with exit code {}: {stderr_preview}", display_exit_code(.exit_code))]
    ChunkCompilation {
        exit_code: Option<i32>,
        stderr_preview: String,
    },

    /// The compiler reported success but left no output file
    #[error("Compilation completed but output file was not created: {0}")]
    OutputNotCreated(String),

    /// Copying the compiled list into the rules directory failed
    #[error("Failed to copy output to rules directory: {source_path} -> {destination} ({reason})")]
    CopyFailed {
        source_path: String,
        destination: String,
        reason: String,
    },

    /// The compiler ran past its wall-clock budget
    #[error("Compilation timed out after {seconds} seconds: {command}")]
    Timeout { seconds: u64, command: String },

    /// Local source lock failure
    #[error("Lock error: {0}")]
    Lock(#[from] rules_filelock::LockError),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A handler cancelled the run before it started
    #[error("Compilation cancelled: {0}")]
    Cancelled(String),

    /// A handler aborted the run at a checkpoint
    #[error("Compilation aborted at {stage}: {reason}")]
    Aborted { stage: String, reason: String },

    /// A handler failed at a fail-fast checkpoint
    #[error("Event handler failed during {event}: {message}")]
    Handler { event: String, message: String },
}

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

impl CompilerError {
    pub fn parse(format: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            format: format.into(),
            message: message.to_string(),
        }
    }

    pub fn aborted(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Aborted {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigNotFound(_) => ErrorCode::ConfigNotFound,
            Self::UnknownFormat(_) => ErrorCode::UnknownExtension,
            Self::Parse { .. } | Self::Json(_) => ErrorCode::ParseError,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::CompilerUnavailable { .. } => ErrorCode::CompilerNotFound,
            Self::ChunkCompilation { .. } => ErrorCode::CompilationFailed,
            Self::OutputNotCreated(_) => ErrorCode::OutputNotCreated,
            Self::CopyFailed { .. } => ErrorCode::CopyFailed,
            Self::Timeout { .. } => ErrorCode::TimeoutError,
            Self::Lock(_) => ErrorCode::LockFailed,
            Self::Io(_) => ErrorCode::FileSystemError,
            Self::Cancelled(_) => ErrorCode::Cancelled,
            Self::Aborted { .. } => ErrorCode::Aborted,
            Self::Handler { .. } => ErrorCode::HandlerFailed,
        }
    }

    /// Whether the user can fix this without touching the compiler itself
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConfigNotFound
                | ErrorCode::UnknownExtension
                | ErrorCode::ValidationFailed
                | ErrorCode::CompilerNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(
            CompilerError::ConfigNotFound("x".into()).code().as_str(),
            "CONFIG_NOT_FOUND"
        );
        assert_eq!(
            CompilerError::Timeout {
                seconds: 300,
                command: "hostlist-compiler".into()
            }
            .code()
            .to_string(),
            "TIMEOUT_ERROR"
        );
    }

    #[test]
    fn recoverable_errors() {
        assert!(CompilerError::UnknownFormat("txt".into()).is_recoverable());
        assert!(CompilerError::CompilerUnavailable { searched: vec![] }.is_recoverable());
        assert!(!CompilerError::OutputNotCreated("out.txt".into()).is_recoverable());
        assert!(!CompilerError::Cancelled("stop".into()).is_recoverable());
    }

    #[test]
    fn chunk_compilation_message_includes_exit_code() {
        let err = CompilerError::ChunkCompilation {
            exit_code: Some(2),
            stderr_preview: "bad source".into(),
        };
        assert_eq!(
            err.to_string(),
            "Compilation failed with exit code 2: bad source"
        );
    }
}
