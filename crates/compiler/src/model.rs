use crate::config::ConfigFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Syntax of a filter source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceKind {
    #[default]
    Adblock,
    Hosts,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adblock => "adblock",
            Self::Hosts => "hosts",
        }
    }

    fn is_default(&self) -> bool {
        *self == Self::Adblock
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "adblock" | "adb" => Ok(Self::Adblock),
            "hosts" | "host" => Ok(Self::Hosts),
            other => Err(format!(
                "unknown source type {other:?}; valid types: adblock, hosts"
            )),
        }
    }
}

impl TryFrom<String> for SourceKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transformations understood by the hostlist compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transformation {
    RemoveComments,
    Compress,
    RemoveModifiers,
    Validate,
    ValidateAllowIp,
    Deduplicate,
    InvertAllow,
    RemoveEmptyLines,
    TrimLines,
    InsertFinalNewLine,
    ConvertToAscii,
}

impl Transformation {
    pub const ALL: [Self; 11] = [
        Self::RemoveComments,
        Self::Compress,
        Self::RemoveModifiers,
        Self::Validate,
        Self::ValidateAllowIp,
        Self::Deduplicate,
        Self::InvertAllow,
        Self::RemoveEmptyLines,
        Self::TrimLines,
        Self::InsertFinalNewLine,
        Self::ConvertToAscii,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RemoveComments => "RemoveComments",
            Self::Compress => "Compress",
            Self::RemoveModifiers => "RemoveModifiers",
            Self::Validate => "Validate",
            Self::ValidateAllowIp => "ValidateAllowIp",
            Self::Deduplicate => "Deduplicate",
            Self::InvertAllow => "InvertAllow",
            Self::RemoveEmptyLines => "RemoveEmptyLines",
            Self::TrimLines => "TrimLines",
            Self::InsertFinalNewLine => "InsertFinalNewLine",
            Self::ConvertToAscii => "ConvertToAscii",
        }
    }

    /// Case-insensitive lookup
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Names in `names` that are not known transformations
    pub fn unknown<'a>(names: &'a [String]) -> Vec<&'a str> {
        names
            .iter()
            .map(String::as_str)
            .filter(|n| Self::from_name(n).is_none())
            .collect()
    }
}

/// One filter list to feed the compiler
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRef {
    /// Human-readable name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// URL or local path
    #[serde(rename = "source", default)]
    pub locator: String,

    #[serde(rename = "type", default, skip_serializing_if = "SourceKind::is_default")]
    pub kind: SourceKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
}

impl SourceRef {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_transformation(mut self, transformation: impl Into<String>) -> Self {
        self.transformations.push(transformation.into());
        self
    }

    #[must_use]
    pub fn with_inclusion(mut self, pattern: impl Into<String>) -> Self {
        self.inclusions.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_exclusion(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    pub fn is_url(&self) -> bool {
        let locator = self.locator.trim_start();
        locator.starts_with("http://") || locator.starts_with("https://")
    }

    pub fn is_local(&self) -> bool {
        !self.is_url()
    }

    /// Name for logs and messages: the explicit name, else the locator.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.locator
        } else {
            &self.name
        }
    }
}

/// A compilation job: list metadata plus ordered sources
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default)]
    pub sources: Vec<SourceRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,

    /// Format the job was read from
    #[serde(skip)]
    pub source_format: Option<ConfigFormat>,

    /// File the job was read from
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = homepage.into();
        self
    }

    #[must_use]
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn with_transformation(mut self, transformation: impl Into<String>) -> Self {
        self.transformations.push(transformation.into());
        self
    }

    #[must_use]
    pub fn with_inclusion(mut self, pattern: impl Into<String>) -> Self {
        self.inclusions.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_exclusion(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    /// Same metadata and global settings, different sources and name.
    #[must_use]
    pub fn derive_with_sources(&self, name: String, sources: Vec<SourceRef>) -> Self {
        Self {
            name,
            sources,
            ..self.clone()
        }
    }

    pub fn local_source_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_local()).count()
    }

    pub fn remote_source_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_url()).count()
    }

    /// Directory the job file lives in, used to resolve relative local sources
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent())
            .map(std::path::Path::to_path_buf)
    }

    /// Resolve a local locator against the job file's directory.
    pub fn resolve_local(&self, source: &SourceRef) -> PathBuf {
        let path = PathBuf::from(source.locator.trim());
        if path.is_absolute() {
            return path;
        }
        match self.base_dir() {
            Some(dir) => dir.join(path),
            None => path,
        }
    }
}
