use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use rules_compiler::{
    compile_rules, find_default_config, read_job, to_json, ChunkingOptions, CompileOptions,
    CompilerResult, ConfigFormat, EventDispatcher, LoggingHandler, DEFAULT_CONFIG_NAMES,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rules-compiler")]
#[command(about = "Compile filter lists with hostlist-compiler", long_about = None)]
#[command(version)]
struct Cli {
    /// Job configuration (JSON, YAML or TOML). Defaults to compiler-config.* in the current
    /// directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file (default: output/compiled-<timestamp>.txt next to the configuration)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration format, overriding the file extension
    #[arg(short, long, value_parser = parse_format)]
    format: Option<ConfigFormat>,

    /// Split the sources into chunks compiled in parallel
    #[arg(long)]
    chunked: bool,

    /// Chunks compiled at once; implies --chunked
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Copy the compiled list into the rules directory
    #[arg(short = 'r', long)]
    copy_to_rules: bool,

    /// Rules directory (default: rules/ next to the configuration)
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Print the parsed configuration as compiler JSON and exit
    #[arg(long)]
    show_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,
}

fn parse_format(value: &str) -> std::result::Result<ConfigFormat, String> {
    value.parse().map_err(|err: rules_compiler::CompilerError| err.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the compilation succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = match cli.config {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_default_config(&cwd).with_context(|| {
                format!(
                    "No configuration file given and none of {} found in {}",
                    DEFAULT_CONFIG_NAMES.join(", "),
                    cwd.display()
                )
            })?
        }
    };

    if cli.show_config {
        let job = read_job(&config_path, cli.format)?;
        println!("{}", to_json(&job)?);
        return Ok(true);
    }

    let mut chunking = ChunkingOptions::default().with_enabled(cli.chunked);
    if let Some(max_parallel) = cli.max_parallel {
        chunking = chunking.with_enabled(true).with_max_parallel(max_parallel);
    }

    let options = CompileOptions {
        output_path: cli.output,
        copy_to_rules: cli.copy_to_rules,
        rules_dir: cli.rules_dir,
        format: cli.format,
        chunking,
        events: EventDispatcher::new().with_handler(Arc::new(LoggingHandler)),
        ..CompileOptions::default()
    };

    let result = compile_rules(&config_path, &options)
        .await
        .with_context(|| format!("Failed to compile {}", config_path.display()))?;

    if !result.stdout.trim().is_empty() {
        log::debug!("Compiler stdout:\n{}", result.stdout.trim_end());
    }
    if !result.stderr.trim().is_empty() {
        log::debug!("Compiler stderr:\n{}", result.stderr.trim_end());
    }

    print_summary(&result);
    if let Some(message) = &result.error_message {
        eprintln!("Error: {message}");
    }
    Ok(result.success)
}

fn print_summary(result: &CompilerResult) {
    let version = if result.config_version.is_empty() {
        String::new()
    } else {
        format!(" v{}", result.config_version)
    };
    println!("Config:  {}{version}", result.config_name);
    println!("Rules:   {}", result.rule_count);
    println!("Output:  {}", result.output_path.display());
    if !result.output_hash.is_empty() {
        println!("SHA-384: {}", result.output_hash);
    }
    if let Some(chunked) = &result.chunked {
        println!(
            "Chunks:  {} ({} failed, {} skipped), {} duplicates removed",
            chunked.chunks.len(),
            chunked.failed_chunks().count(),
            chunked.skipped_chunks().count(),
            chunked.duplicates_removed
        );
    }
    if let Some(destination) = &result.rules_destination {
        println!("Copied:  {}", destination.display());
    }
    println!("Elapsed: {}ms", result.elapsed_ms);
}
