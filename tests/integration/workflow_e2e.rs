//! End-to-end plan, run and report tests.

use std::sync::Arc;

use serde_json::json;

use taskpilot::core::{StepStatus, TaskCategory, TaskStatus};
use taskpilot::orchestration::TaskEvent;
use taskpilot::state::MemoryStore;
use taskpilot::{Error, TaskApi};

use super::fixtures::{builder, eventually, gated_research, wait_done, Gate, RecordingSink};

/// Test: Research task runs to completion
/// Given a research task
/// When all three steps succeed
/// Then the task completes with a perfect report and no retries
#[tokio::test]
async fn test_research_task_completes() {
    let orch = builder().build().await.unwrap();

    let task = orch
        .create_task("compare tokio and async-std schedulers", TaskCategory::Research)
        .unwrap();
    let names: Vec<_> = task.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["search", "verify", "synthesize"]);
    assert!(task.steps[0].dependencies.is_empty());
    assert_eq!(task.steps[1].dependencies, vec![task.steps[0].id.clone()]);
    assert_eq!(task.steps[2].dependencies, vec![task.steps[1].id.clone()]);

    let done = wait_done(&orch, task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.retry_count, 0);
    assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(done.result.as_ref().unwrap()["summary"].is_string());

    let report = orch.get_report(task.id).expect("report generated on completion");
    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.metrics.success_rate, 1.0);
    assert_eq!(report.metrics.retry_rate, 0.0);
    assert_eq!(report.steps_completed, 3);
    assert_eq!(report.steps_total, 3);
    assert!(!report.conclusion.is_empty());
    assert!(!report.logs.is_empty());
}

/// Test: Blank description is rejected
/// Given an empty description
/// When a task is created
/// Then planning fails and nothing is stored
#[tokio::test]
async fn test_blank_description_stores_nothing() {
    let sink = RecordingSink::new();
    let orch = builder().sink(sink.clone()).build().await.unwrap();

    let err = orch.create_task("", TaskCategory::Research).unwrap_err();
    assert!(matches!(err, Error::Planning(_)));

    let err = orch.create_task("   ", TaskCategory::Analysis).unwrap_err();
    assert!(matches!(err, Error::Planning(_)));

    assert!(orch.get_all_tasks().is_empty());
    assert!(orch.get_all_reports().is_empty());
    assert_eq!(orch.get_stats().total, 0);
    assert!(sink.events().is_empty());
}

/// Test: Every category has a working pipeline
/// Given one task per category
/// When they all run
/// Then each completes with a category-shaped result
#[tokio::test]
async fn test_every_category_completes() {
    let orch = builder().build().await.unwrap();

    let mut ids = Vec::new();
    for category in TaskCategory::ALL {
        let task = orch
            .create_task("summarise release notes for the storage engine", category)
            .unwrap();
        ids.push((category, task.id));
    }

    for (category, id) in ids {
        let done = wait_done(&orch, id).await;
        assert_eq!(done.status, TaskStatus::Completed, "{} did not complete", category);
        let result = done.result.unwrap();
        match category {
            TaskCategory::Research => assert!(result.get("sources").is_some()),
            TaskCategory::Analysis => assert!(result.get("patterns").is_some()),
            TaskCategory::Creation => assert!(result["word_count"].as_u64().unwrap() > 0),
            TaskCategory::Automation | TaskCategory::General => {
                assert!(result.get("output").is_some())
            }
        }
    }
}

/// Test: Lifecycle events arrive in order
/// Given a recording sink
/// When a task runs to completion
/// Then it sees creation, both status changes and a final report event
#[tokio::test]
async fn test_lifecycle_events() {
    let sink = RecordingSink::new();
    let orch = builder().sink(sink.clone()).build().await.unwrap();

    let task = orch
        .create_task("profile allocator usage", TaskCategory::General)
        .unwrap();
    wait_done(&orch, task.id).await;

    let events = sink.for_task(task.id);
    assert!(matches!(
        events.first(),
        Some(TaskEvent::Created { category: TaskCategory::General, .. })
    ));
    assert_eq!(
        sink.statuses(task.id),
        vec![TaskStatus::InProgress, TaskStatus::Completed]
    );
    assert!(matches!(events.last(), Some(TaskEvent::ReportReady { .. })));
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Updated { .. })));
}

/// Test: JSON API envelopes
/// Given the caller-facing API
/// When a task is created, polled and reported
/// Then every answer is a result envelope
#[tokio::test]
async fn test_api_round_trip() {
    let orch = builder().build().await.unwrap();
    let api = TaskApi::new(orch.clone());

    let created = api.create_task("draft a migration guide", "creation");
    assert_eq!(created["result"], "success");
    assert_eq!(created["category"], "creation");
    assert_eq!(
        created["steps"],
        json!(["outline", "draft", "refine", "finalize"])
    );

    let id = created["id"].as_str().unwrap().to_string();
    wait_done(&orch, id.parse().unwrap()).await;

    let status = api.get_status(&id);
    assert_eq!(status["status"], "completed");
    assert_eq!(status["progress"]["total"], 4);

    let report = api.get_report(&id);
    assert_eq!(report["result"], "success");
    assert_eq!(report["report"]["steps_completed"], 4);

    let again = api.cancel(&id);
    assert_eq!(again["result"], "error");

    let unknown = api.create_task("draft a migration guide", "poetry");
    assert_eq!(unknown["result"], "error");
}

/// Test: Step progress is visible while a task runs
/// Given a research task held inside its verify step
/// When its status is read mid-run
/// Then search shows completed and verify in progress, both live and on disk
#[tokio::test]
async fn test_step_progress_visible_mid_run() {
    let gate = Gate::new();
    let store = Arc::new(MemoryStore::new());
    let orch = builder()
        .store(store.clone())
        .worker(gated_research(gate.clone()))
        .build()
        .await
        .unwrap();
    let api = TaskApi::new(orch.clone());

    let task = orch
        .create_task("compare columnar file formats", TaskCategory::Research)
        .unwrap();
    eventually(|| gate.in_flight() == 1).await;

    let live = orch.get_task_status(task.id).unwrap();
    assert_eq!(live.status, TaskStatus::InProgress);
    assert_eq!(
        live.steps.iter().map(|s| s.status).collect::<Vec<_>>(),
        vec![StepStatus::Completed, StepStatus::InProgress, StepStatus::Pending]
    );
    assert_eq!(live.current_step_index, 1);
    assert!(live.metadata.contains_key("sources"));

    let status = api.get_status(&task.id.to_string());
    assert_eq!(status["progress"]["completed"], 1);
    assert_eq!(status["current_step"], "verify");

    orch.flush().await;
    let saved = store.snapshot();
    assert_eq!(saved.tasks[0].steps[0].status, StepStatus::Completed);
    assert_eq!(saved.tasks[0].steps[1].status, StepStatus::InProgress);

    gate.release(1);
    let done = wait_done(&orch, task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.current_step_index, 3);
}
