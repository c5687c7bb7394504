#![allow(dead_code)]

use rules_compiler::events::{
    ChunkCompletedArgs, ChunkStartedArgs, ChunksMergedArgs, ChunksMergingArgs,
    CompilationCompletedArgs, CompilationErrorArgs, CompilationStartingArgs,
    ConfigurationLoadedArgs, FileLockAcquiredArgs, FileLockFailedArgs, FileLockReleasedArgs,
    SourceLoadedArgs, SourceLoadingArgs, ValidationArgs,
};
use rules_compiler::{CompilationEventHandler, CompilerCommand};
use std::path::Path;
use std::sync::Mutex;

/// Stand-in for `hostlist-compiler`: writes one `||<source>^` rule per source plus a rule every
/// chunk shares. Locators containing `fail-me`, `slow-me` or `no-output` trigger the matching
/// failure.
pub const FAKE_COMPILER: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --config) cfg="$2"; shift 2 ;;
    --output) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if grep -q 'fail-me' "$cfg"; then
  echo "cannot download fail-me" >&2
  exit 3
fi
if grep -q 'slow-me' "$cfg"; then
  sleep 5
fi
if grep -q 'no-output' "$cfg"; then
  exit 0
fi
echo "! compiled by fake" > "$out"
sed -n 's/.*"source": "\([^"]*\)".*/||\1^/p' "$cfg" >> "$out"
echo "||shared.example^" >> "$out"
"#;

/// Write the fake compiler into `dir` and build a command that runs it through `sh`.
///
/// Going through `sh` keeps the script from being exec'd while another test thread may still
/// hold a write handle to it.
pub fn fake_compiler(dir: &Path) -> CompilerCommand {
    let script = dir.join("fake-hostlist-compiler.sh");
    std::fs::write(&script, FAKE_COMPILER).expect("write fake compiler");
    CompilerCommand::new("sh").with_arg(script)
}

pub fn write_json_job(dir: &Path, name: &str, sources: &[&str]) -> std::path::PathBuf {
    let sources: Vec<serde_json::Value> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| serde_json::json!({ "name": format!("s{i}"), "source": source }))
        .collect();
    let job = serde_json::json!({ "name": name, "version": "1.0.0", "sources": sources });
    let path = dir.join("compiler-config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&job).expect("json")).expect("write job");
    path
}

/// Records event names in the order they were raised, and can veto at chosen checkpoints.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub cancel: bool,
    pub abort_validation: bool,
    pub skip_source: Option<usize>,
    pub skip_chunk: Option<usize>,
    pub fail_chunk: Option<usize>,
    pub continue_without_lock: bool,
    pub handle_errors: bool,
}

impl Recorder {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().expect("events").push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

impl CompilationEventHandler for Recorder {
    fn on_compilation_starting(&self, args: &mut CompilationStartingArgs) -> anyhow::Result<()> {
        self.record("starting");
        if self.cancel {
            args.cancel("maintenance window");
        }
        Ok(())
    }

    fn on_configuration_loaded(&self, args: &ConfigurationLoadedArgs) -> anyhow::Result<()> {
        self.record(format!("configuration_loaded:{}", args.source_count));
        Ok(())
    }

    fn on_validation(&self, args: &mut ValidationArgs) -> anyhow::Result<()> {
        self.record("validation");
        if self.abort_validation {
            args.abort("policy says no");
        }
        Ok(())
    }

    fn on_source_loading(&self, args: &mut SourceLoadingArgs) -> anyhow::Result<()> {
        self.record(format!("source_loading:{}", args.source_index));
        if self.skip_source == Some(args.source_index) {
            args.skip("blocked host");
        }
        Ok(())
    }

    fn on_source_loaded(&self, args: &SourceLoadedArgs) -> anyhow::Result<()> {
        self.record(format!("source_loaded:{}", args.source_index));
        Ok(())
    }

    fn on_file_lock_acquired(&self, _args: &FileLockAcquiredArgs) -> anyhow::Result<()> {
        self.record("lock_acquired");
        Ok(())
    }

    fn on_file_lock_released(&self, args: &FileLockReleasedArgs) -> anyhow::Result<()> {
        self.record(format!("lock_released:{}", args.was_modified));
        Ok(())
    }

    fn on_file_lock_failed(&self, args: &mut FileLockFailedArgs) -> anyhow::Result<()> {
        self.record("lock_failed");
        args.continue_without_lock = self.continue_without_lock;
        Ok(())
    }

    fn on_chunk_started(&self, args: &mut ChunkStartedArgs) -> anyhow::Result<()> {
        self.record(format!("chunk_started:{}", args.chunk_index));
        if self.skip_chunk == Some(args.chunk_index) {
            args.skip("not needed");
        }
        if self.fail_chunk == Some(args.chunk_index) {
            anyhow::bail!("chunk {} rejected", args.chunk_index);
        }
        Ok(())
    }

    fn on_chunk_completed(&self, args: &ChunkCompletedArgs) -> anyhow::Result<()> {
        self.record(format!("chunk_completed:{}:{}", args.chunk_index, args.success));
        Ok(())
    }

    fn on_chunks_merging(&self, args: &ChunksMergingArgs) -> anyhow::Result<()> {
        self.record(format!("merging:{}", args.chunk_count));
        Ok(())
    }

    fn on_chunks_merged(&self, args: &ChunksMergedArgs) -> anyhow::Result<()> {
        self.record(format!("merged:{}", args.final_rule_count));
        Ok(())
    }

    fn on_compilation_completed(&self, _args: &CompilationCompletedArgs) -> anyhow::Result<()> {
        self.record("completed");
        Ok(())
    }

    fn on_compilation_error(&self, args: &mut CompilationErrorArgs) -> anyhow::Result<()> {
        self.record(format!("error:{}", args.error_code));
        args.handled = self.handle_errors;
        Ok(())
    }
}
