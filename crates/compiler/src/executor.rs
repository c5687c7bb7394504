use crate::command::CompilerCommand;
use crate::config::to_json;
use crate::error::{CompilerError, Result};
use crate::model::JobSpec;
use crate::options::ChunkMetadata;
use crate::util::{count_rules, millis, stderr_preview};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, Instant};

const CONFIG_FILE: &str = "config.json";
const OUTPUT_FILE: &str = "output.txt";

/// Runs one sub-job through the external compiler.
#[derive(Debug, Clone)]
pub struct ChunkExecutor {
    command: Option<CompilerCommand>,
    working_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ChunkExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            command: None,
            working_dir: None,
            output_dir: None,
            timeout,
        }
    }

    /// Use this command instead of resolving one from the environment on each run.
    #[must_use]
    pub fn with_command(mut self, command: CompilerCommand) -> Self {
        self.command = Some(command);
        self
    }

    /// Directory the compiler runs in, so relative local sources resolve against it.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Keep each successful chunk's output as `<dir>/chunk-<n>.txt`. Without this the output
    /// only lives in the chunk's temp dir and no location is recorded.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Compile `job`, recording the outcome in `metadata`.
    ///
    /// Never fails: on error the lines are empty and `metadata` carries the message. The
    /// temporary input and output files are removed on every path.
    pub async fn execute(
        &self,
        job: JobSpec,
        mut metadata: ChunkMetadata,
    ) -> (Vec<String>, ChunkMetadata) {
        let start = Instant::now();
        log::debug!(
            "Starting chunk {}/{}: {}",
            metadata.number(),
            metadata.total(),
            job.name
        );

        match self.compile(&job, metadata.number()).await {
            Ok((lines, output_location)) => {
                let rules = count_rules(lines.iter().map(String::as_str));
                let elapsed_ms = millis(start.elapsed());
                metadata.mark_succeeded(rules, elapsed_ms, output_location);
                log::info!(
                    "Chunk {}/{} complete: {rules} rules in {elapsed_ms}ms",
                    metadata.number(),
                    metadata.total()
                );
                (lines, metadata)
            }
            Err(err) => {
                metadata.mark_failed(err.to_string(), millis(start.elapsed()));
                log::error!(
                    "Chunk {}/{} failed: {err}",
                    metadata.number(),
                    metadata.total()
                );
                (Vec::new(), metadata)
            }
        }
    }

    async fn compile(
        &self,
        job: &JobSpec,
        number: usize,
    ) -> Result<(Vec<String>, Option<PathBuf>)> {
        // Dropping the directory removes both files, whichever way we leave.
        let workdir = tempfile::Builder::new().prefix("rules-chunk-").tempdir()?;
        let config_path = workdir.path().join(CONFIG_FILE);
        let output_path = workdir.path().join(OUTPUT_FILE);

        tokio::fs::write(&config_path, to_json(job)?).await?;

        let command = match &self.command {
            Some(command) => command.clone(),
            None => CompilerCommand::resolve(None)?,
        };
        let output = run_compiler(
            &command,
            &config_path,
            &output_path,
            self.working_dir.as_deref(),
            self.timeout,
        )
        .await?;
        ensure_success(&output)?;

        let text = read_output(&output_path).await?;
        let lines = text.lines().map(str::to_string).collect();

        let kept = match &self.output_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let kept = dir.join(format!("chunk-{number}.txt"));
                tokio::fs::write(&kept, &text).await?;
                Some(kept)
            }
            None => None,
        };
        Ok((lines, kept))
    }
}

/// Run the compiler once with a wall-clock budget. On timeout the child is killed.
pub(crate) async fn run_compiler(
    command: &CompilerCommand,
    config_path: &Path,
    output_path: &Path,
    working_dir: Option<&Path>,
    timeout: Duration,
) -> Result<Output> {
    let described = command.describe(config_path, output_path);
    log::debug!("Running: {described}");

    let mut cmd = command.to_tokio(config_path, output_path);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| CompilerError::Timeout {
            seconds: timeout.as_secs(),
            command: described,
        })?
        .map_err(CompilerError::from)
}

/// Non-zero exit is a [`CompilerError::ChunkCompilation`] with a bounded stderr preview.
pub(crate) fn ensure_success(output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(CompilerError::ChunkCompilation {
        exit_code: output.status.code(),
        stderr_preview: stderr_preview(&output.stderr),
    })
}

/// Read the compiler output, distinguishing a missing file from other IO failures.
pub(crate) async fn read_output(output_path: &Path) -> Result<String> {
    match tokio::fs::read(output_path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
            CompilerError::OutputNotCreated(output_path.display().to_string()),
        ),
        Err(err) => Err(err.into()),
    }
}
