#![cfg(unix)]

mod common;

use common::{fake_compiler, write_json_job, Recorder};
use pretty_assertions::assert_eq;
use rules_compiler::{
    read_job, ChunkingOptions, CompilerError, EventDispatcher, Pipeline, PipelineOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn options(temp: &TempDir, max_parallel: usize) -> PipelineOptions {
    let chunking = ChunkingOptions::for_large_lists()
        .with_max_parallel(max_parallel)
        .with_timeout(Duration::from_secs(30));
    PipelineOptions::new(chunking)
        .with_compiler(fake_compiler(temp.path()))
        .with_output_path(temp.path().join("out/merged.txt"))
        .with_lock_timeout(Duration::from_secs(2))
}

fn pipeline(recorder: &Arc<Recorder>) -> Pipeline {
    Pipeline::new(EventDispatcher::new().with_handler(recorder.clone()))
}

#[tokio::test]
async fn merges_chunks_and_raises_events_in_order() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(
        temp.path(),
        "Big list",
        &[
            "https://a.example/list.txt",
            "https://b.example/list.txt",
            "https://c.example/list.txt",
            "https://d.example/list.txt",
        ],
    );
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder::default());

    let result = pipeline(&recorder)
        .run(&job, &options(&temp, 2))
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.chunks.len(), 2);
    assert_eq!(result.total_rules_observed, 6);
    assert_eq!(result.final_rule_count, 5);
    assert_eq!(result.duplicates_removed, 1);

    let merged = std::fs::read_to_string(temp.path().join("out/merged.txt")).unwrap();
    assert_eq!(
        merged,
        "! compiled by fake\n\
         ||https://a.example/list.txt^\n\
         ||https://b.example/list.txt^\n\
         ||shared.example^\n\
         ! compiled by fake\n\
         ||https://c.example/list.txt^\n\
         ||https://d.example/list.txt^\n"
    );

    assert_eq!(
        recorder.events(),
        vec![
            "starting",
            "configuration_loaded:4",
            "validation",
            "source_loading:0",
            "source_loaded:0",
            "source_loading:1",
            "source_loaded:1",
            "source_loading:2",
            "source_loaded:2",
            "source_loading:3",
            "source_loaded:3",
            "chunk_started:0",
            "chunk_started:1",
            "chunk_completed:0:true",
            "chunk_completed:1:true",
            "merging:2",
            "merged:5",
            "completed",
        ]
    );
}

#[tokio::test]
async fn plan_caps_chunks_at_max_parallel() {
    let temp = TempDir::new().unwrap();
    let sources: Vec<String> = (0..5).map(|i| format!("https://h{i}.example/")).collect();
    let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
    let config = write_json_job(temp.path(), "Waves", &sources);
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder::default());

    // Five workers plan one chunk per source; two workers plan two chunks.
    let mut opts = options(&temp, 5);
    let result = pipeline(&recorder).run(&job, &opts).await.unwrap();
    assert_eq!(result.chunks.len(), 5);

    opts.chunking.max_parallel = 2;
    let recorder = Arc::new(Recorder::default());
    let result = pipeline(&recorder).run(&job, &opts).await.unwrap();
    assert_eq!(result.chunks.len(), 2);
    assert!(result.success);

    let events = recorder.events();
    let first_completed = events
        .iter()
        .position(|e| e.starts_with("chunk_completed"))
        .unwrap();
    let last_started = events
        .iter()
        .rposition(|e| e.starts_with("chunk_started"))
        .unwrap();
    // Both chunks of the single wave are started before either completes.
    assert!(last_started < first_completed);
}

#[tokio::test]
async fn failing_chunk_does_not_stop_its_siblings() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(
        temp.path(),
        "Partial",
        &["https://fail-me.example/list.txt", "https://ok.example/list.txt"],
    );
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder::default());

    let result = pipeline(&recorder)
        .run(&job, &options(&temp, 2))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Chunk 1: "), "{}", result.errors[0]);
    assert!(result.errors[0].contains("cannot download fail-me"));
    assert_eq!(result.failed_chunks().count(), 1);

    let merged = result.merged_rules.unwrap();
    assert_eq!(
        merged,
        vec![
            "! compiled by fake",
            "||https://ok.example/list.txt^",
            "||shared.example^",
        ]
    );
    assert!(
        recorder.position("chunk_completed:0:false") < recorder.position("chunk_completed:1:true")
    );
    assert!(recorder.position("completed").is_some());
}

#[tokio::test]
async fn chunk_timeout_kills_only_that_chunk() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(
        temp.path(),
        "Slow",
        &["https://slow-me.example/list.txt", "https://fast.example/list.txt"],
    );
    let job = read_job(&config, None).unwrap();
    let mut opts = options(&temp, 2);
    opts.chunking.timeout = Duration::from_secs(1);

    let started = std::time::Instant::now();
    let result = Pipeline::default().run(&job, &opts).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert!(result.errors[0].contains("timed out after 1 seconds"), "{:?}", result.errors);
    assert_eq!(result.final_rule_count, 2);
    assert_eq!(result.chunks[1].actual_rules(), Some(2));
}

#[tokio::test]
async fn missing_output_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(temp.path(), "Silent", &["https://no-output.example/"]);
    let job = read_job(&config, None).unwrap();

    let result = Pipeline::default()
        .run(&job, &options(&temp, 1))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.errors[0].contains("output file was not created"));
    assert!(result.merged_rules.is_none());
}

#[tokio::test]
async fn cancel_stops_before_any_work() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(temp.path(), "Cancelled", &["https://a.example/"]);
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder {
        cancel: true,
        ..Recorder::default()
    });

    let err = pipeline(&recorder)
        .run(&job, &options(&temp, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, CompilerError::Cancelled(ref reason) if reason == "maintenance window"));
    assert_eq!(recorder.events(), vec!["starting", "error:CANCELLED"]);
    assert!(!temp.path().join("out/merged.txt").exists());
}

#[tokio::test]
async fn validation_abort_is_an_error() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(temp.path(), "Aborted", &["https://a.example/"]);
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder {
        abort_validation: true,
        handle_errors: true,
        ..Recorder::default()
    });

    let err = pipeline(&recorder)
        .run(&job, &options(&temp, 2))
        .await
        .unwrap_err();

    match err {
        CompilerError::Aborted { stage, reason } => {
            assert_eq!(stage, "configuration");
            assert_eq!(reason, "policy says no");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorder.count("source_loading"), 0);
    assert_eq!(recorder.count("error:ABORTED"), 1);
}

#[tokio::test]
async fn skipped_sources_and_chunks_are_not_errors() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(
        temp.path(),
        "Skips",
        &[
            "https://a.example/",
            "https://blocked.example/",
            "https://c.example/",
        ],
    );
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder {
        skip_source: Some(1),
        skip_chunk: Some(0),
        ..Recorder::default()
    });

    let result = pipeline(&recorder)
        .run(&job, &options(&temp, 2))
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(recorder.count("source_loaded"), 2);
    assert_eq!(result.chunks.len(), 2);
    assert_eq!(result.skipped_chunks().count(), 1);
    assert_eq!(
        result.merged_rules.unwrap(),
        vec!["! compiled by fake", "||https://c.example/^", "||shared.example^"]
    );
    assert_eq!(result.final_rule_count, 2);
}

#[tokio::test]
async fn local_sources_are_locked_for_the_whole_run() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("local.txt"), "||local.example^\n! note\n").unwrap();
    let config = write_json_job(
        temp.path(),
        "Local",
        &["local.txt", "https://remote.example/"],
    );
    let job = read_job(&config, None).unwrap();
    let recorder = Arc::new(Recorder::default());
    let pipeline = pipeline(&recorder);

    let result = pipeline.run(&job, &options(&temp, 2)).await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.chunks[0].estimated_rules(), 1);
    assert_eq!(recorder.count("lock_acquired"), 1);
    assert_eq!(recorder.count("lock_released:false"), 1);
    assert!(recorder.position("lock_acquired") < recorder.position("source_loaded:0"));
    assert!(recorder.position("completed") < recorder.position("lock_released:false"));
    assert_eq!(pipeline.lock_manager().active_count(), 0);
}

#[tokio::test]
async fn missing_local_source_fails_unless_a_handler_continues() {
    let temp = TempDir::new().unwrap();
    let config = write_json_job(temp.path(), "Missing", &["missing.txt"]);
    let job = read_job(&config, None).unwrap();

    let recorder = Arc::new(Recorder::default());
    let err = pipeline(&recorder)
        .run(&job, &options(&temp, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CompilerError::Lock(_)), "{err}");
    assert_eq!(recorder.count("lock_failed"), 1);
    assert_eq!(recorder.count("error:LOCK_FAILED"), 1);

    let recorder = Arc::new(Recorder {
        continue_without_lock: true,
        ..Recorder::default()
    });
    let result = pipeline(&recorder)
        .run(&job, &options(&temp, 1))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(recorder.count("lock_acquired"), 0);
    assert_eq!(recorder.count("source_loaded"), 1);
}
