use crate::command::CompilerCommand;
use crate::config::{read_job, to_json, ConfigFormat};
use crate::error::{CompilerError, Result};
use crate::events::EventDispatcher;
use crate::executor::{ensure_success, run_compiler};
use crate::limits::chunk_timeout_from_env;
use crate::model::JobSpec;
use crate::options::{should_enable_chunking, ChunkedResult, ChunkingOptions};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::util::{count_rules, millis, sha384_hex};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// File name used when copying the compiled list into the rules directory
pub const RULES_FILE_NAME: &str = "adguard_user_filter.txt";

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Defaults to `<job dir>/output/compiled-<unix secs>.txt`
    pub output_path: Option<PathBuf>,
    pub copy_to_rules: bool,
    /// Defaults to `<job dir>/rules`
    pub rules_dir: Option<PathBuf>,
    /// Overrides extension-based format detection
    pub format: Option<ConfigFormat>,
    /// Compiler to run; resolved from `RULES_COMPILER_BIN` and `PATH` when unset
    pub compiler: Option<CompilerCommand>,
    pub timeout: Duration,
    pub chunking: ChunkingOptions,
    /// Handlers for the chunked path
    pub events: EventDispatcher,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_path: None,
            copy_to_rules: false,
            rules_dir: None,
            format: None,
            compiler: None,
            timeout: chunk_timeout_from_env(),
            chunking: ChunkingOptions::default(),
            events: EventDispatcher::new(),
        }
    }
}

/// Outcome of [`compile_rules`]
#[derive(Debug, Clone, Default)]
pub struct CompilerResult {
    pub success: bool,
    pub config_name: String,
    pub config_version: String,
    pub rule_count: usize,
    pub output_path: PathBuf,
    /// SHA-384 of the output file, lowercase hex
    pub output_hash: String,
    pub copied_to_rules: bool,
    pub rules_destination: Option<PathBuf>,
    pub elapsed_ms: u64,
    pub error_message: Option<String>,
    pub stdout: String,
    pub stderr: String,
    /// Present when the job was compiled in chunks
    pub chunked: Option<ChunkedResult>,
}

/// Compile the job at `config_path` into one list.
///
/// Configuration, validation and missing-compiler problems are errors. A compiler run that
/// fails or produces no output yields `Ok` with `success == false` and the message set, so
/// callers still see stdout and stderr.
pub async fn compile_rules(config_path: &Path, options: &CompileOptions) -> Result<CompilerResult> {
    let start = Instant::now();
    let job = read_job(config_path, options.format)?;
    log::info!(
        "Compiling {} ({} sources)",
        job.name,
        job.sources.len()
    );

    let report = job.validate(false);
    for warning in &report.warnings {
        log::warn!("Configuration warning: {warning}");
    }
    if !report.is_valid() {
        return Err(CompilerError::Validation {
            errors: report.errors,
            warnings: report.warnings,
        });
    }

    let job_dir = job.base_dir().unwrap_or_else(|| PathBuf::from("."));
    let output_path = match &options.output_path {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => std::env::current_dir()?.join(path),
        None => default_output_path(&job_dir)?,
    };
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut result = CompilerResult {
        config_name: job.name.clone(),
        config_version: job.version.clone(),
        output_path: output_path.clone(),
        ..Default::default()
    };

    let compiled = if should_enable_chunking(&job, Some(&options.chunking)) {
        compile_chunked(&job, options, &output_path, &mut result).await?
    } else {
        compile_single(&job, config_path, options, &job_dir, &output_path, &mut result).await?
    };

    if compiled {
        let content = tokio::fs::read(&output_path).await?;
        result.rule_count = count_rules(String::from_utf8_lossy(&content).lines());
        result.output_hash = sha384_hex(&content);
        result.success = result.error_message.is_none();

        if options.copy_to_rules && result.success {
            let rules_dir = options
                .rules_dir
                .clone()
                .unwrap_or_else(|| job_dir.join("rules"));
            let destination = copy_to_rules(&output_path, &rules_dir).await?;
            result.copied_to_rules = true;
            result.rules_destination = Some(destination);
        }
    }

    result.elapsed_ms = millis(start.elapsed());
    if result.success {
        log::info!(
            "Compiled {} rules to {} in {}ms",
            result.rule_count,
            result.output_path.display(),
            result.elapsed_ms
        );
    }
    Ok(result)
}

/// Returns whether an output file was produced.
async fn compile_single(
    job: &JobSpec,
    config_path: &Path,
    options: &CompileOptions,
    job_dir: &Path,
    output_path: &Path,
    result: &mut CompilerResult,
) -> Result<bool> {
    // Non-JSON jobs are handed to the compiler as a JSON copy that lives as long as `_temp`.
    let _temp;
    let compile_config = if job.source_format == Some(ConfigFormat::Json) {
        job.source_path
            .clone()
            .unwrap_or_else(|| config_path.to_path_buf())
    } else {
        let dir = tempfile::Builder::new().prefix("rules-config-").tempdir()?;
        let path = dir.path().join("compiler-config.json");
        tokio::fs::write(&path, to_json(job)?).await?;
        log::debug!("Created temp JSON config: {}", path.display());
        _temp = dir;
        path
    };

    let command = match &options.compiler {
        Some(command) => command.clone(),
        None => CompilerCommand::resolve(None)?,
    };
    let output = match run_compiler(
        &command,
        &compile_config,
        output_path,
        Some(job_dir),
        options.timeout,
    )
    .await
    {
        Ok(output) => output,
        Err(err @ CompilerError::Timeout { .. }) => {
            result.error_message = Some(err.to_string());
            return Ok(false);
        }
        Err(err) => return Err(err),
    };
    result.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    result.stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if let Err(err) = ensure_success(&output) {
        result.error_message = Some(err.to_string());
        return Ok(false);
    }
    if tokio::fs::metadata(output_path).await.is_err() {
        let err = CompilerError::OutputNotCreated(output_path.display().to_string());
        result.error_message = Some(err.to_string());
        return Ok(false);
    }
    Ok(true)
}

async fn compile_chunked(
    job: &JobSpec,
    options: &CompileOptions,
    output_path: &Path,
    result: &mut CompilerResult,
) -> Result<bool> {
    let chunking = options.chunking.clone().with_timeout(options.timeout);
    let mut pipeline_options = PipelineOptions::new(chunking).with_output_path(output_path);
    pipeline_options.compiler = options.compiler.clone();

    let chunked = Pipeline::new(options.events.clone())
        .run(job, &pipeline_options)
        .await?;
    if !chunked.success {
        result.error_message = Some(chunked.errors.join("; "));
    }
    let produced = chunked.merged_rules.is_some();
    result.chunked = Some(chunked);
    Ok(produced)
}

async fn copy_to_rules(output_path: &Path, rules_dir: &Path) -> Result<PathBuf> {
    let destination = rules_dir.join(RULES_FILE_NAME);
    let copy_failed = |reason: std::io::Error| CompilerError::CopyFailed {
        source_path: output_path.display().to_string(),
        destination: destination.display().to_string(),
        reason: reason.to_string(),
    };
    tokio::fs::create_dir_all(rules_dir)
        .await
        .map_err(copy_failed)?;
    tokio::fs::copy(output_path, &destination)
        .await
        .map_err(copy_failed)?;
    log::info!("Copied output to {}", destination.display());
    Ok(destination)
}

fn default_output_path(job_dir: &Path) -> Result<PathBuf> {
    let dir = job_dir.join("output");
    std::fs::create_dir_all(&dir)?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Ok(dir.join(format!("compiled-{stamp}.txt")))
}
