use rules_filelock::LockMode;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// Finding raised by a validation checkpoint for a rule the job violates
pub const CODE_VALIDATION_ERROR: &str = "ZT001";
/// Finding raised by a validation checkpoint for a suspicious but accepted job
pub const CODE_VALIDATION_WARNING: &str = "ZT002";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Errors and critical findings fail a checkpoint.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub location: Option<String>,
}

impl ValidationFinding {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            location: None,
        }
    }

    #[must_use]
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

/// Before anything runs. Setting `cancel` stops the run.
#[derive(Debug, Clone)]
pub struct CompilationStartingArgs {
    pub timestamp: SystemTime,
    pub config_path: Option<PathBuf>,
    pub cancel: bool,
    pub cancel_reason: Option<String>,
}

impl CompilationStartingArgs {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            config_path,
            cancel: false,
            cancel_reason: None,
        }
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.cancel = true;
        self.cancel_reason = Some(reason.into());
    }
}

#[derive(Debug, Clone)]
pub struct ConfigurationLoadedArgs {
    pub timestamp: SystemTime,
    pub config_path: Option<PathBuf>,
    pub name: String,
    pub source_count: usize,
}

/// A validation checkpoint. Handlers may add findings or set `abort`.
#[derive(Debug, Clone)]
pub struct ValidationArgs {
    pub timestamp: SystemTime,
    pub stage_name: String,
    pub findings: Vec<ValidationFinding>,
    pub duration_ms: u64,
    pub items_validated: usize,
    pub abort: bool,
    pub abort_reason: Option<String>,
}

impl ValidationArgs {
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage_name: stage_name.into(),
            findings: Vec::new(),
            duration_ms: 0,
            items_validated: 0,
            abort: false,
            abort_reason: None,
        }
    }

    /// No error or critical findings
    pub fn passed(&self) -> bool {
        !self.findings.iter().any(|f| f.severity.is_failure())
    }

    pub fn add_finding(&mut self, finding: ValidationFinding) {
        self.findings.push(finding);
    }

    pub fn add_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.add_finding(ValidationFinding::new(Severity::Error, code, message));
    }

    pub fn add_warning(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.add_finding(ValidationFinding::new(Severity::Warning, code, message));
    }

    /// Record a critical finding and abort.
    pub fn add_critical(&mut self, code: impl Into<String>, message: impl Into<String>) {
        let message = message.into();
        self.add_finding(ValidationFinding::new(
            Severity::Critical,
            code,
            message.clone(),
        ));
        self.abort(message);
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort = true;
        self.abort_reason = Some(reason.into());
    }

    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| f.message.clone())
            .collect()
    }
}

/// Before a source is taken into the job. Setting `skip` drops it.
#[derive(Debug, Clone)]
pub struct SourceLoadingArgs {
    pub timestamp: SystemTime,
    pub source_index: usize,
    pub total_sources: usize,
    pub url: String,
    pub name: Option<String>,
    pub is_local_file: bool,
    pub skip: bool,
    pub skip_reason: Option<String>,
}

impl SourceLoadingArgs {
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip = true;
        self.skip_reason = Some(reason.into());
    }
}

#[derive(Debug, Clone)]
pub struct SourceLoadedArgs {
    pub timestamp: SystemTime,
    pub source_index: usize,
    pub total_sources: usize,
    pub url: String,
    pub name: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub content_size_bytes: u64,
    pub estimated_rule_count: usize,
    pub load_duration_ms: u64,
    /// SHA-256 of a local source, taken under its lock
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileLockAcquiredArgs {
    pub timestamp: SystemTime,
    pub path: PathBuf,
    pub lock_type: LockMode,
    pub lock_id: String,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileLockReleasedArgs {
    pub timestamp: SystemTime,
    pub path: PathBuf,
    pub lock_id: String,
    pub lock_duration_ms: u64,
    pub was_modified: bool,
    pub hash_before: Option<String>,
    pub hash_after: Option<String>,
}

/// A lock could not be taken. Setting `continue_without_lock` lets the run proceed.
#[derive(Debug, Clone)]
pub struct FileLockFailedArgs {
    pub timestamp: SystemTime,
    pub path: PathBuf,
    pub lock_type: LockMode,
    pub reason: String,
    pub continue_without_lock: bool,
}

/// Before a chunk is launched. Setting `skip` leaves it unexecuted.
#[derive(Debug, Clone)]
pub struct ChunkStartedArgs {
    pub timestamp: SystemTime,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub source_count: usize,
    pub estimated_rules: usize,
    pub skip: bool,
    pub skip_reason: Option<String>,
}

impl ChunkStartedArgs {
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip = true;
        self.skip_reason = Some(reason.into());
    }
}

#[derive(Debug, Clone)]
pub struct ChunkCompletedArgs {
    pub timestamp: SystemTime,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub success: bool,
    pub error_message: Option<String>,
    pub rule_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ChunksMergingArgs {
    pub timestamp: SystemTime,
    pub chunk_count: usize,
    pub rules_before_merge: usize,
}

#[derive(Debug, Clone)]
pub struct ChunksMergedArgs {
    pub timestamp: SystemTime,
    pub chunk_count: usize,
    pub rules_before_merge: usize,
    pub final_rule_count: usize,
    pub duplicates_removed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CompilationCompletedArgs {
    pub timestamp: SystemTime,
    pub rule_count: usize,
    pub output_path: Option<PathBuf>,
    pub duration_ms: u64,
    /// SHA-384 of the merged output
    pub content_hash: Option<String>,
}

/// The run failed. Handlers may set `handled` to acknowledge it; the error still propagates.
#[derive(Debug, Clone)]
pub struct CompilationErrorArgs {
    pub timestamp: SystemTime,
    pub error_message: String,
    pub error_code: String,
    pub handled: bool,
}
