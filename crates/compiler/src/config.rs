use crate::error::{CompilerError, Result};
use crate::model::JobSpec;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File names probed, in order, when no job file is given
pub const DEFAULT_CONFIG_NAMES: [&str; 3] = [
    "compiler-config.json",
    "compiler-config.yaml",
    "compiler-config.toml",
];

/// Textual format of a job file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }

    /// Detect the format from the file extension, case-insensitively.
    pub fn detect(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for ConfigFormat {
    type Err = CompilerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(CompilerError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a job from text in the given format.
pub fn parse_job(content: &str, format: ConfigFormat) -> Result<JobSpec> {
    let mut job: JobSpec = match format {
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| CompilerError::parse("JSON", e))?
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| CompilerError::parse("YAML", e))?
        }
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| CompilerError::parse("TOML", e))?
        }
    };
    job.source_format = Some(format);
    Ok(job)
}

/// Read a job file. `format` overrides extension detection.
pub fn read_job(path: &Path, format: Option<ConfigFormat>) -> Result<JobSpec> {
    if !path.is_file() {
        return Err(CompilerError::ConfigNotFound(path.display().to_string()));
    }
    let format = match format {
        Some(format) => format,
        None => ConfigFormat::detect(path)?,
    };
    log::debug!("Reading {format} job from {}", path.display());

    let content = std::fs::read_to_string(path)?;
    let mut job = parse_job(&content, format)?;
    job.source_path = Some(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
    Ok(job)
}

/// Compiler input JSON for `job`
pub fn to_json(job: &JobSpec) -> Result<String> {
    Ok(serde_json::to_string_pretty(job)?)
}

/// First default job file present in `dir`
pub fn find_default_config(dir: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}
