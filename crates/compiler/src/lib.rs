//! # Rules Compiler
//!
//! Orchestrates the external `hostlist-compiler` over large filter-list jobs: the job is split
//! into chunks of sources, chunks are compiled in parallel waves, and the outputs are merged
//! with rule-level deduplication. Every stage raises events that handlers can observe or veto.
//!
//! ```text
//! JobSpec
//!     │
//!     ├──> validation (zero-trust checkpoint)
//!     │
//!     ├──> local sources read-locked + hashed
//!     │
//!     ├──> plan ──> waves of ChunkExecutor (subprocess, timeout, temp files)
//!     │
//!     └──> merge (order-preserving, deduplicating) ──> merged rules
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rules_compiler::{read_job, ChunkingOptions, Pipeline, PipelineOptions};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let job = read_job(Path::new("compiler-config.yaml"), None)?;
//!     let options = PipelineOptions::new(ChunkingOptions::for_large_lists())
//!         .with_output_path("output/merged.txt");
//!
//!     let result = Pipeline::default().run(&job, &options).await?;
//!     println!(
//!         "{} rules, {} duplicates removed",
//!         result.final_rule_count, result.duplicates_removed
//!     );
//!     Ok(())
//! }
//! ```

mod command;
mod compiler;
mod config;
mod error;
pub mod events;
mod executor;
mod limits;
mod merger;
mod model;
mod options;
mod pipeline;
mod planner;
mod scheduler;
mod util;
mod validation;

pub use command::{CompilerCommand, COMPILER_PACKAGE, COMPILER_PROGRAM};
pub use compiler::{compile_rules, CompileOptions, CompilerResult, RULES_FILE_NAME};
pub use config::{
    find_default_config, parse_job, read_job, to_json, ConfigFormat, DEFAULT_CONFIG_NAMES,
};
pub use error::{CompilerError, ErrorCode, Result};
pub use events::{CompilationEventHandler, EventDispatcher, LoggingHandler};
pub use executor::ChunkExecutor;
pub use limits::{
    chunk_timeout_from_env, max_parallel_from_env, CHUNK_TIMEOUT_ENV, COMPILER_BIN_ENV,
    DEFAULT_CHUNK_TIMEOUT_SECS, MAX_PARALLEL_CAP, MAX_PARALLEL_ENV,
};
pub use merger::merge_chunks;
pub use model::{JobSpec, SourceKind, SourceRef, Transformation};
pub use options::{
    estimate_speedup, should_enable_chunking, ChunkMetadata, ChunkedResult, ChunkingOptions,
    ChunkingStrategy, DEFAULT_CHUNK_SIZE,
};
pub use pipeline::{Pipeline, PipelineOptions, DEFAULT_LOCK_TIMEOUT};
pub use planner::{plan, PlannedChunk};
pub use scheduler::BatchScheduler;
pub use util::{count_rules, sha384_hex};
pub use validation::ValidationReport;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
