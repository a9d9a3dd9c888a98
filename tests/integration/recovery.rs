//! Error classification, retry, rollback and restart recovery tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use taskpilot::core::{StepKind, StepStatus, TaskCategory, TaskStatus};
use taskpilot::orchestration::handlers::builtin_worker;
use taskpilot::orchestration::{
    classify_message, handler_fn, ErrorClass, Planner, RestartPolicy, StepError, TaskEvent,
};
use taskpilot::state::{JsonFileStore, MemoryStore, Snapshot, TaskStore};

use super::fixtures::{
    builder, corrupting_research, eventually, flaky_research, gated_research, wait_done,
    wait_idle, Gate, RecordingSink,
};

/// Test: Temporary failures are retried
/// Given a verify step that times out twice
/// When the task runs
/// Then it is retried twice and completes
#[tokio::test]
async fn test_timeout_retried_until_success() {
    let (worker, calls) = flaky_research(2, "upstream timeout while verifying");
    let sink = RecordingSink::new();
    let orch = builder().worker(worker).sink(sink.clone()).build().await.unwrap();

    let task = orch
        .create_task("rank vector databases", TaskCategory::Research)
        .unwrap();
    let done = wait_done(&orch, task.id).await;

    assert_eq!(classify_message("upstream timeout while verifying"), ErrorClass::Temporary);
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // search ran once, its output survived both retries
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));

    let retries = sink
        .statuses(task.id)
        .into_iter()
        .filter(|s| *s == TaskStatus::Retrying)
        .count();
    assert_eq!(retries, 2);

    let report = orch.get_report(task.id).unwrap();
    assert_eq!(report.retry_count, 2);
    assert!((report.metrics.retry_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!(report.recommendations.iter().any(|r| r.contains("retr")));
}

/// Test: Non-recoverable failures stop at once
/// Given a verify step that fails with "unauthorized"
/// When the task runs
/// Then it fails after one attempt and the completed search step is kept
#[tokio::test]
async fn test_unauthorized_fails_without_retry() {
    let (worker, calls) = flaky_research(usize::MAX, "401 unauthorized");
    let orch = builder().worker(worker).build().await.unwrap();

    let task = orch
        .create_task("audit api gateway logs", TaskCategory::Research)
        .unwrap();
    let done = wait_done(&orch, task.id).await;

    assert_eq!(classify_message("401 unauthorized"), ErrorClass::NonRecoverable);
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.retry_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(done.error.as_deref().unwrap().contains("unauthorized"));

    assert_eq!(done.steps[0].status, StepStatus::Completed);
    assert_eq!(done.steps[1].status, StepStatus::Failed);
    assert!(!done.metadata.contains_key("rollback"));
    assert_eq!(done.current_step_index, 1);

    let report = orch.get_report(task.id).unwrap();
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.steps_completed, 1);
    assert_eq!(report.steps_failed, 1);
    assert!(report.metrics.success_rate > 0.0 && report.metrics.success_rate < 1.0);
}

/// Test: Corrupted data is rolled back and redone
/// Given a verify step that reports its sources as corrupted once
/// When the task runs
/// Then the completed search is discarded, run again, and the task completes
#[tokio::test]
async fn test_corrupted_sources_trigger_full_redo() {
    let (worker, searches) = corrupting_research();
    let orch = builder().worker(worker).build().await.unwrap();

    let task = orch
        .create_task("benchmark message brokers", TaskCategory::Research)
        .unwrap();
    let done = wait_done(&orch, task.id).await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.retry_count, 1);
    assert_eq!(searches.load(Ordering::SeqCst), 2);
    assert_eq!(done.metadata["rollback"]["performed"], true);
    assert_eq!(done.metadata["rollback"]["steps_discarded"], 1);
    // sources come from the second search, not the discarded first one
    assert_eq!(done.metadata["sources"][0]["topic"], "run 2");
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));

    let report = orch.get_report(task.id).unwrap();
    assert_eq!(report.steps_completed, 3);
}

/// Test: Retry budget is bounded
/// Given a step that always fails with a recoverable message
/// When the task runs
/// Then it makes exactly max_retries + 1 attempts and fails
#[tokio::test]
async fn test_retry_budget_exhausted() {
    let (worker, calls) = flaky_research(usize::MAX, "service unavailable");
    let orch = builder()
        .max_retries(2)
        .worker(worker)
        .build()
        .await
        .unwrap();

    let task = orch
        .create_task("crawl changelogs", TaskCategory::Research)
        .unwrap();
    assert_eq!(task.max_retries, 2);
    let done = wait_done(&orch, task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

fn interrupted_snapshot() -> Snapshot {
    let planner = Planner::default();
    let now = Utc::now();

    let mut running = planner
        .plan("interrupted research run", TaskCategory::Research)
        .unwrap();
    running.start(now);
    running.steps[0].mark_in_progress(now);

    let waiting = planner
        .plan("still waiting in the queue", TaskCategory::General)
        .unwrap();

    Snapshot::new(vec![running, waiting], Vec::new())
}

/// Test: Restart resumes interrupted work
/// Given a state file with one in-progress and one pending task
/// When a new orchestrator starts with the resume policy
/// Then both tasks are re-queued and complete
#[tokio::test]
async fn test_restart_resumes_interrupted_tasks() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
    let snapshot = interrupted_snapshot();
    let (running_id, waiting_id) = (snapshot.tasks[0].id, snapshot.tasks[1].id);
    store.save(&snapshot).unwrap();

    let sink = RecordingSink::new();
    let orch = builder()
        .store(store.clone())
        .restart_policy(RestartPolicy::Resume)
        .sink(sink.clone())
        .build()
        .await
        .unwrap();

    assert!(sink.events().iter().any(|e| matches!(
        e,
        TaskEvent::StatusChanged { task_id, from: TaskStatus::InProgress, to: TaskStatus::Pending }
            if *task_id == running_id
    )));

    let resumed = wait_done(&orch, running_id).await;
    assert_eq!(resumed.status, TaskStatus::Completed);
    assert!(resumed.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(wait_done(&orch, waiting_id).await.status, TaskStatus::Completed);

    wait_idle(&orch).await;
    let saved = store.load().unwrap();
    assert!(saved.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(saved.reports.len(), 2);
}

/// Test: Restart keeps steps finished before the crash
/// Given a snapshot saved while a research task was held in verify
/// When a new orchestrator resumes from it
/// Then search is not run again and the task completes
#[tokio::test]
async fn test_resume_skips_steps_completed_before_restart() {
    let gate = Gate::new();
    let first_store = Arc::new(MemoryStore::new());
    let first = builder()
        .store(first_store.clone())
        .worker(gated_research(gate.clone()))
        .build()
        .await
        .unwrap();
    let task = first
        .create_task("profile allocator behaviour", TaskCategory::Research)
        .unwrap();
    eventually(|| gate.in_flight() == 1).await;
    first.flush().await;

    let searches = Arc::new(AtomicUsize::new(0));
    let seen = searches.clone();
    let worker = builtin_worker(TaskCategory::Research).with_handler(
        StepKind::Search,
        handler_fn(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(StepError::new("search ran twice"))
        }),
    );
    let second = builder()
        .store(Arc::new(MemoryStore::with_snapshot(first_store.snapshot())))
        .restart_policy(RestartPolicy::Resume)
        .worker(Arc::new(worker))
        .build()
        .await
        .unwrap();

    let resumed = wait_done(&second, task.id).await;
    assert_eq!(resumed.status, TaskStatus::Completed);
    assert_eq!(searches.load(Ordering::SeqCst), 0);
    assert_eq!(resumed.retry_count, 0);
    assert!(resumed.steps.iter().all(|s| s.status == StepStatus::Completed));

    gate.release(1);
    wait_done(&first, task.id).await;
}

/// Test: Restart can fail interrupted work
/// Given the same interrupted snapshot
/// When the orchestrator starts with the fail policy
/// Then the in-progress task is failed with a report and the pending one still runs
#[tokio::test]
async fn test_restart_fail_policy() {
    let snapshot = interrupted_snapshot();
    let (running_id, waiting_id) = (snapshot.tasks[0].id, snapshot.tasks[1].id);
    let store = Arc::new(MemoryStore::with_snapshot(snapshot));

    let orch = builder()
        .store(store.clone())
        .restart_policy(RestartPolicy::Fail)
        .build()
        .await
        .unwrap();

    let failed = orch.get_task_status(running_id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("interrupted by restart"));
    assert_eq!(failed.steps[0].status, StepStatus::Failed);
    assert!(!orch.is_running(running_id));
    assert_eq!(
        orch.get_report(running_id).unwrap().status,
        TaskStatus::Failed
    );

    assert_eq!(wait_done(&orch, waiting_id).await.status, TaskStatus::Completed);
    assert!(store.saves() > 0);
}
