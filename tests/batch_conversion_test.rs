//! Batch conversion integration tests.
//!
//! Drives the orchestrator facade end to end over the in-memory engine and
//! checks wave scheduling, routing, admission, and failure isolation.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use mb_core::events::EventPayload;
use mb_core::ErrorKind;
use mb_engine::{MemoryBehavior, MemoryLoader};
use mb_orchestrator::{InputFile, TaskState};

use common::{config_with_parallel, wav_inputs, TestHarness};

// ---------------------------------------------------------------------------
// Waves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn five_files_two_parallel_run_in_three_sequential_waves() {
    let harness = TestHarness::with_loader(
        config_with_parallel(2),
        MemoryLoader::new().with_exec_delay(Duration::from_millis(10)),
    );
    let orch = &harness.orchestrator;
    let mut rx = orch.subscribe();

    let tasks = orch.submit_files(wav_inputs(5));
    let summary = orch.start_pending(Some("ogg")).await.unwrap();

    assert_eq!(summary.completed, 5);
    assert_eq!(summary.waves, 3);
    assert!(orch
        .tasks()
        .iter()
        .all(|t| t.state == TaskState::Completed && t.progress == 100));

    let mut wave_sizes = Vec::new();
    let mut open = 0usize;
    while let Ok(event) = rx.try_recv() {
        match event.payload {
            EventPayload::WaveStarted { size, .. } => {
                assert_eq!(open, 0, "a wave started before the previous one settled");
                wave_sizes.push(size);
            }
            EventPayload::TaskStarted { .. } => open += 1,
            EventPayload::TaskCompleted { .. } | EventPayload::TaskFailed { .. } => open -= 1,
            _ => {}
        }
    }
    assert_eq!(wave_sizes, vec![2, 2, 1]);
    assert_eq!(harness.loader.stats().max_in_flight(), 2);

    // Artifacts follow completion order; every task has exactly one.
    assert_eq!(orch.artifacts().len(), tasks.len());
    for task in orch.tasks() {
        let artifact_id = task.artifact_id.unwrap();
        let artifact = orch
            .artifacts()
            .into_iter()
            .find(|a| a.id == artifact_id)
            .unwrap();
        assert_eq!(artifact.task_id, task.id);
        assert!(artifact.output_name.ends_with(".ogg"));
    }
}

#[tokio::test]
async fn engine_loads_once_for_many_batches() {
    let harness = TestHarness::with_config(config_with_parallel(3));
    let orch = &harness.orchestrator;

    for _ in 0..3 {
        orch.submit_files(wav_inputs(4));
        orch.start_pending(None).await.unwrap();
    }
    assert_eq!(harness.loader.stats().load_calls(), 1);
    assert_eq!(orch.artifacts().len(), 12);
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn video_input_is_extracted_to_mp3() {
    let harness = TestHarness::new();
    let orch = &harness.orchestrator;

    let tasks = orch.submit_files(vec![
        InputFile::new("clip.mp4", &b"video"[..]),
        InputFile::new("song.flac", &b"audio"[..]),
    ]);
    orch.start_conversion(&[tasks[0].id, tasks[1].id], Some("wav"))
        .await
        .unwrap();

    let names: Vec<_> = orch
        .artifacts()
        .into_iter()
        .map(|a| (a.output_name, a.mime_type))
        .collect();
    assert!(names.contains(&("clip.mp3".to_string(), "audio/mp3".to_string())));
    assert!(names.contains(&("song.wav".to_string(), "audio/wav".to_string())));

    let log = harness.loader.stats().exec_log();
    let extract = log.iter().find(|args| args.contains(&"-vn".to_string())).unwrap();
    assert!(extract.windows(2).any(|w| w[0] == "-ar" && w[1] == "44100"));
    assert!(extract.windows(2).any(|w| w[0] == "-ac" && w[1] == "2"));
    assert!(extract.windows(2).any(|w| w[0] == "-f" && w[1] == "mp3"));
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_file_fails_immediately() {
    let mut config = config_with_parallel(2);
    config.limits.max_file_size = 1024;
    let harness = TestHarness::with_config(config);
    let orch = &harness.orchestrator;

    let tasks = orch.submit_files(vec![InputFile {
        name: "huge.wav".into(),
        bytes: bytes::Bytes::new(),
        size: 4096,
    }]);
    let task = &tasks[0];
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.failure_kind, Some(ErrorKind::SizeLimitExceeded));
    assert_eq!(task.progress, 0);
    assert!(task.error.as_deref().unwrap().contains("huge.wav"));

    let summary = orch.start_pending(None).await.unwrap();
    assert_eq!(summary.waves, 0);
    let summary = orch.start_conversion(&[task.id], None).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(harness.loader.stats().load_calls(), 0);
    assert_eq!(harness.loader.stats().total_calls(), 0);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_load_failure_then_retry_succeeds() {
    let harness = TestHarness::with_loader(
        config_with_parallel(2),
        MemoryLoader::new().failing_first_loads(1),
    );
    let orch = &harness.orchestrator;

    let first = orch.submit_files(wav_inputs(3));
    let summary = orch.start_pending(None).await.unwrap();
    assert_eq!(summary.failed, 3);
    for task in &first {
        let task = orch.task(task.id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.failure_kind, Some(ErrorKind::EngineLoad));
    }
    assert!(!orch.engine().is_loaded());

    orch.submit_files(wav_inputs(1));
    let summary = orch.start_pending(None).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert!(orch.engine().is_loaded());
    assert_eq!(orch.engine().load_attempts(), 2);

    // Failed tasks stay failed.
    for task in &first {
        assert_eq!(orch.task(task.id).unwrap().state, TaskState::Failed);
    }
}

#[tokio::test]
async fn partial_failure_still_reports_successes() {
    let harness = TestHarness::with_loader(
        config_with_parallel(2),
        MemoryLoader::with_behavior(MemoryBehavior {
            fail_write_matching: vec!["track1".into()],
            fail_read_matching: vec!["track3".into()],
            ..Default::default()
        }),
    );
    let orch = &harness.orchestrator;

    orch.submit_files(wav_inputs(4));
    let summary = orch.start_pending(None).await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 2);

    let failed: Vec<_> = orch
        .tasks()
        .into_iter()
        .filter(|t| t.state == TaskState::Failed)
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed
        .iter()
        .all(|t| t.failure_kind == Some(ErrorKind::EngineIo) && t.error.is_some()));
    assert_eq!(orch.artifacts().len(), 2);
    assert!(harness.loader.file_names().is_empty());
}

#[tokio::test]
async fn cleanup_errors_do_not_fail_tasks() {
    let harness = TestHarness::with_loader(
        config_with_parallel(2),
        MemoryLoader::with_behavior(MemoryBehavior {
            fail_delete: true,
            ..Default::default()
        }),
    );
    let orch = &harness.orchestrator;
    orch.submit_files(wav_inputs(2));
    let summary = orch.start_pending(None).await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(harness.loader.stats().delete_calls(), 4);
}

#[tokio::test]
async fn unsupported_format_is_a_validation_error() {
    let harness = TestHarness::new();
    let orch = &harness.orchestrator;
    orch.submit_files(wav_inputs(1));
    assert_matches!(
        orch.start_pending(Some("xyz")).await,
        Err(mb_core::Error::Validation(_))
    );
    assert_eq!(orch.tasks()[0].state, TaskState::Pending);
}
