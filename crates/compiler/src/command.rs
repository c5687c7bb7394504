use crate::error::{CompilerError, Result};
use crate::limits::{compiler_bin_from_env, COMPILER_BIN_ENV};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const COMPILER_PROGRAM: &str = "hostlist-compiler";
pub const NPX_PROGRAM: &str = "npx";
pub const COMPILER_PACKAGE: &str = "@adguard/hostlist-compiler";

/// How to invoke the external compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl CompilerCommand {
    /// Run `program` directly.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Argument placed before `--config`, e.g. a script for an interpreter.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Resolve the compiler: `explicit`, then `RULES_COMPILER_BIN`, then `hostlist-compiler`
    /// on `PATH`, then `npx @adguard/hostlist-compiler`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut searched = Vec::new();

        for (label, candidate) in [
            ("explicit", explicit.map(Path::to_path_buf)),
            (COMPILER_BIN_ENV, compiler_bin_from_env()),
        ] {
            let Some(candidate) = candidate else {
                continue;
            };
            if candidate.is_file() {
                log::debug!("Using {label} compiler {}", candidate.display());
                return Ok(Self::new(candidate));
            }
            if let Some(found) = find_in_path(&candidate) {
                return Ok(Self::new(found));
            }
            searched.push(format!("{label}: {}", candidate.display()));
        }

        if let Some(found) = find_in_path(Path::new(COMPILER_PROGRAM)) {
            return Ok(Self::new(found));
        }
        searched.push(format!("{COMPILER_PROGRAM} on PATH"));

        if let Some(npx) = find_in_path(Path::new(NPX_PROGRAM)) {
            return Ok(Self {
                program: npx,
                leading_args: vec![OsString::from(COMPILER_PACKAGE)],
            });
        }
        searched.push(format!("{NPX_PROGRAM} on PATH"));

        Err(CompilerError::CompilerUnavailable { searched })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list for one compile.
    pub fn args(&self, config_path: &Path, output_path: &Path) -> Vec<OsString> {
        let mut args = self.leading_args.clone();
        args.push("--config".into());
        args.push(config_path.as_os_str().to_owned());
        args.push("--output".into());
        args.push(output_path.as_os_str().to_owned());
        args
    }

    pub fn to_tokio(&self, config_path: &Path, output_path: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.args(config_path, output_path))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Human-readable command line, for logs and errors
    pub fn describe(&self, config_path: &Path, output_path: &Path) -> String {
        std::iter::once(self.program.as_os_str().to_owned())
            .chain(self.args(config_path, output_path))
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Look `name` up on `PATH`. Names with a directory component are not searched.
fn find_in_path(name: &Path) -> Option<PathBuf> {
    if name.components().count() != 1 {
        return None;
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    ["", "exe", "cmd", "bat"]
        .iter()
        .map(|ext| {
            let path = dir.join(name);
            if ext.is_empty() {
                path
            } else {
                path.with_extension(ext)
            }
        })
        .collect()
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
