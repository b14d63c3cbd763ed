mod common;

use common::*;
use runbook_orchestrator::error::OrchestratorError;
use runbook_orchestrator::events::OrchestrationEvent;
use runbook_orchestrator::models::{AttemptOutcome, RunRequest, RunbookTemplate};
use runbook_orchestrator::orchestration::Clock;
use runbook_orchestrator::state_machine::{
    FileRunStore, RunStateTracker, RunStatus, RunStore, StepEvent, StepStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

fn close_runbook() -> RunbookTemplate {
    RunbookTemplate::new(
        "close",
        vec![
            custom_step("extract", "record"),
            custom_step("publish", "record").depends_on(["extract"]),
            custom_step("notify", "record").depends_on(["publish"]),
        ],
    )
}

#[tokio::test]
async fn test_resume_never_reexecutes_succeeded_steps() {
    let state_dir = TempDir::new().unwrap();
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::new(state_dir.path()));
    let definition = load(close_runbook());

    // a previous process finished `extract` and stopped while `publish` was running
    let harness = Harness::builder().store(store.clone()).build();
    let now = harness.clock.now();
    let mut tracker = RunStateTracker::create(
        definition.clone(),
        RunRequest::triggered_by("cron"),
        store.clone(),
        now,
    )
    .await
    .unwrap();
    tracker.mark_run_started(now).await.unwrap();
    tracker
        .apply_all(
            vec![
                ("extract".to_string(), StepEvent::MarkReady),
                ("extract".to_string(), StepEvent::Start),
                ("extract".to_string(), StepEvent::Succeed),
                ("publish".to_string(), StepEvent::MarkReady),
                ("publish".to_string(), StepEvent::Start),
            ],
            now,
        )
        .await
        .unwrap();
    let run_id = tracker.run().run_id;
    drop(tracker);

    let recorder = RecordingHandler::succeeding();
    harness.register("record", recorder.clone());
    let summary = harness
        .coordinator
        .resume_run(definition, run_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(recorder.calls(), vec!["publish", "notify"]);
    assert_eq!(summary.step("extract").unwrap().attempts, 1);
    assert_eq!(summary.step("publish").unwrap().attempts, 2);

    let persisted = store.load(run_id).await.unwrap().unwrap();
    let publish = persisted.step("publish").unwrap();
    assert_eq!(publish.status, StepStatus::Succeeded);
    assert!(matches!(
        &publish.attempts[0].outcome,
        Some(AttemptOutcome::Failed { error }) if error.detail == "interrupted by restart"
    ));
    assert_eq!(persisted.triggered_by, "cron");
}

#[tokio::test]
async fn test_resume_of_finished_run_returns_its_summary() {
    let state_dir = TempDir::new().unwrap();
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::new(state_dir.path()));
    let harness = Harness::builder().store(store.clone()).build();
    let recorder = RecordingHandler::succeeding();
    harness.register("record", recorder.clone());
    let definition = load(close_runbook());

    let first = harness.run(definition.clone()).await;
    assert!(state_dir
        .path()
        .join(format!("{}.json", first.run_id))
        .exists());

    let resumed = harness
        .coordinator
        .resume_run(definition, first.run_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(resumed, first);
    assert_eq!(recorder.calls().len(), 3);
}

#[tokio::test]
async fn test_resume_of_finished_run_does_not_announce_it_again() {
    let harness = Harness::new();
    harness.register("record", RecordingHandler::succeeding());
    let mut events = harness.coordinator.publisher().subscribe();
    let definition = load(close_runbook());

    let first = harness.run(definition.clone()).await;
    harness
        .coordinator
        .resume_run(definition, first.run_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let mut completions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, OrchestrationEvent::RunCompleted(ref summary) if summary.run_id == first.run_id)
        {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_resume_requires_known_run() {
    let state_dir = TempDir::new().unwrap();
    let harness = Harness::builder()
        .store(Arc::new(FileRunStore::new(state_dir.path())))
        .build();

    let error = harness
        .coordinator
        .resume_run(load(close_runbook()), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestratorError::RunNotFound(_)));
}

#[tokio::test]
async fn test_every_transition_is_persisted() {
    let state_dir = TempDir::new().unwrap();
    let store: Arc<dyn RunStore> = Arc::new(FileRunStore::new(state_dir.path()));
    let harness = Harness::builder().store(store.clone()).build();
    harness.register("record", RecordingHandler::succeeding());

    let summary = harness.run(load(close_runbook())).await;
    let persisted = store.load(summary.run_id).await.unwrap().unwrap();

    // per step: ready, running, succeeded; plus run started and run finished
    assert_eq!(persisted.transitions.len(), 3 * 3 + 2);
    let sequences = persisted
        .transitions
        .iter()
        .map(|record| record.sequence)
        .collect::<Vec<_>>();
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(store.list().await.unwrap(), vec![summary.run_id]);
}
