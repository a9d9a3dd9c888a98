//! Snapshot persistence tests.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use taskpilot::config::Config;
use taskpilot::core::{TaskCategory, TaskStatus};
use taskpilot::orchestration::{OrchestratorBuilder, Planner};
use taskpilot::state::{remove_task, JsonFileStore, Snapshot, TaskStore};

use super::fixtures::{builder, wait_done, wait_idle};

/// Test: Finished work survives a restart
/// Given tasks run against a JSON state file
/// When a second orchestrator opens the same file
/// Then it sees the same tasks and reports and runs nothing again
#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let (first_id, second_id) = {
        let orch = builder()
            .store(Arc::new(JsonFileStore::new(&path)))
            .build()
            .await
            .unwrap();
        let done = orch.create_task("index the wiki", TaskCategory::Analysis).unwrap();
        let other = orch.create_task("write release notes", TaskCategory::Creation).unwrap();
        wait_done(&orch, done.id).await;
        wait_done(&orch, other.id).await;
        wait_idle(&orch).await;
        (done.id, other.id)
    };
    assert!(path.exists());

    let reopened = builder()
        .store(Arc::new(JsonFileStore::new(&path)))
        .build()
        .await
        .unwrap();
    assert_eq!(reopened.queued_count(), 0);
    assert_eq!(reopened.running_count(), 0);

    for id in [first_id, second_id] {
        let task = reopened.get_task_status(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let report = reopened.get_report(id).unwrap();
        assert_eq!(report.task_id, id);
        assert_eq!(report.steps_completed, task.steps.len());
    }
    assert_eq!(reopened.get_stats().completed, 2);
}

/// Test: Snapshot writes keep a backup
/// Given a state file that has been written at least twice
/// Then the previous snapshot sits next to it and no temp file remains
#[tokio::test]
async fn test_backup_written() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
    let orch = builder().store(store.clone()).build().await.unwrap();

    let first = orch.create_task("rotate keys", TaskCategory::Automation).unwrap();
    wait_done(&orch, first.id).await;
    let second = orch.create_task("prune old backups", TaskCategory::Automation).unwrap();
    wait_done(&orch, second.id).await;

    assert!(store.backup_path().exists());
    assert!(!store.path().with_extension("json.tmp").exists());
    let saved = store.load().unwrap();
    assert_eq!(saved.tasks.len(), 2);
    assert_eq!(saved.reports.len(), 2);
}

/// Test: Deleting from the state file runs nothing
/// Given a state file with two tasks that never ran
/// When one is removed through the store
/// Then the other is left exactly as it was and no orchestrator is involved
#[tokio::test]
async fn test_remove_task_from_state_file() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
    let planner = Planner::default();
    let doomed = planner.plan("obsolete job", TaskCategory::General).unwrap();
    let kept = planner.plan("job for later", TaskCategory::Research).unwrap();
    store
        .save(&Snapshot::new(vec![doomed.clone(), kept.clone()], Vec::new()))
        .unwrap();

    assert!(remove_task(store.clone(), doomed.id).await.unwrap());
    assert!(!remove_task(store.clone(), doomed.id).await.unwrap());

    let saved = store.load().unwrap();
    assert_eq!(saved.tasks, vec![kept]);
    assert_eq!(saved.tasks[0].status, TaskStatus::Pending);
}

/// Test: Corrupt state refuses to start
/// Given a state file that is not JSON
/// When an orchestrator is built over it
/// Then building fails instead of silently discarding the file
#[tokio::test]
async fn test_corrupt_state_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, "{ truncated").unwrap();

    let result = builder()
        .store(Arc::new(JsonFileStore::new(&path)))
        .build()
        .await;
    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ truncated");
}

/// Test: Builder from config
/// Given a config file pointing at a custom state path
/// When the orchestrator is built from it
/// Then the capacity and state location follow the config
#[tokio::test]
async fn test_builder_from_config() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("taskpilot.toml");
    let state_path = dir.path().join("custom").join("tasks.json");
    fs::write(
        &config_path,
        format!(
            "max_concurrent_tasks = 2\nstate_path = \"{}\"\n\n[retry]\nbase_delay_ms = 1\nmax_delay_ms = 2\n",
            state_path.display()
        ),
    )
    .unwrap();

    let config = Config::load_from(&config_path).unwrap();
    let orch = OrchestratorBuilder::from_config(&config)
        .unwrap()
        .build()
        .await
        .unwrap();
    assert_eq!(orch.max_concurrent_tasks(), 2);

    let task = orch.create_task("ship it", TaskCategory::General).unwrap();
    wait_done(&orch, task.id).await;
    assert!(state_path.exists());
}
