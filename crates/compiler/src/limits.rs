use std::path::PathBuf;
use std::time::Duration;

pub const MAX_PARALLEL_CAP: usize = 64;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 300;

pub const MAX_PARALLEL_ENV: &str = "RULES_COMPILER_MAX_PARALLEL";
pub const CHUNK_TIMEOUT_ENV: &str = "RULES_COMPILER_CHUNK_TIMEOUT_SECS";
pub const COMPILER_BIN_ENV: &str = "RULES_COMPILER_BIN";

fn default_max_parallel() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_PARALLEL_CAP)
}

fn parse_max_parallel(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_PARALLEL_CAP)
}

fn parse_timeout_secs(raw: Option<&str>) -> u64 {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CHUNK_TIMEOUT_SECS)
        .max(1)
}

/// Parallelism cap: `RULES_COMPILER_MAX_PARALLEL`, else the host's available parallelism.
pub fn max_parallel_from_env() -> usize {
    let raw = std::env::var(MAX_PARALLEL_ENV).ok();
    parse_max_parallel(raw.as_deref(), default_max_parallel())
}

/// Clamp a caller-provided parallelism to the supported range.
pub fn clamp_max_parallel(value: usize) -> usize {
    value.clamp(1, MAX_PARALLEL_CAP)
}

/// Per-invocation wall-clock budget for the external compiler
pub fn chunk_timeout_from_env() -> Duration {
    let raw = std::env::var(CHUNK_TIMEOUT_ENV).ok();
    Duration::from_secs(parse_timeout_secs(raw.as_deref()))
}

pub fn compiler_bin_from_env() -> Option<PathBuf> {
    std::env::var_os(COMPILER_BIN_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
