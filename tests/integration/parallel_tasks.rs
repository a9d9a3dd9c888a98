//! Concurrency bound and admission order tests.

use futures::future::join_all;

use taskpilot::core::{TaskCategory, TaskStatus};

use super::fixtures::{builder, eventually, gated_general, wait_done, wait_idle, Gate};

/// Test: Capacity bounds the running set
/// Given max_concurrent_tasks = 3
/// When 5 tasks are created at once
/// Then 3 start immediately and 2 wait in the queue until a slot frees
#[tokio::test]
async fn test_five_tasks_three_slots() {
    let gate = Gate::new();
    let orch = builder()
        .max_concurrent_tasks(3)
        .worker(gated_general(gate.clone()))
        .build()
        .await
        .unwrap();

    let ids: Vec<_> = (0..5)
        .map(|i| {
            orch.create_task(&format!("job {}", i), TaskCategory::General)
                .unwrap()
                .id
        })
        .collect();

    assert_eq!(orch.running_count(), 3);
    assert_eq!(orch.queued_count(), 2);
    eventually(|| gate.in_flight() == 3).await;
    assert!(orch.is_running(ids[0]));
    assert!(!orch.is_running(ids[3]));
    assert_eq!(
        orch.get_task_status(ids[4]).unwrap().status,
        TaskStatus::Pending
    );

    // One slot frees, exactly one queued task moves in.
    gate.release(1);
    eventually(|| gate.started() == 4).await;
    assert_eq!(orch.running_count(), 3);
    assert_eq!(orch.queued_count(), 1);

    gate.release(4);
    let done = join_all(ids.iter().map(|id| wait_done(&orch, *id))).await;
    assert!(done.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(gate.peak(), 3);

    let stats = orch.get_stats();
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.max_concurrent_tasks, 3);
}

/// Test: Queue is first in, first out
/// Given a single slot
/// When three tasks are queued behind a held one
/// Then they start in creation order
#[tokio::test]
async fn test_fifo_admission() {
    let gate = Gate::new();
    let orch = builder()
        .max_concurrent_tasks(1)
        .worker(gated_general(gate.clone()))
        .build()
        .await
        .unwrap();

    let ids: Vec<_> = (0..4)
        .map(|i| {
            orch.create_task(&format!("ordered {}", i), TaskCategory::General)
                .unwrap()
                .id
        })
        .collect();

    for (n, id) in ids.iter().enumerate() {
        eventually(|| orch.is_running(*id)).await;
        for later in &ids[n + 1..] {
            assert!(!orch.is_running(*later));
        }
        gate.release(1);
        wait_done(&orch, *id).await;
    }

    let order: Vec<_> = ids
        .iter()
        .map(|id| orch.get_task_status(*id).unwrap().started_at.unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] <= w[1]));
}

/// Test: Many independent tasks
/// Given capacity 4 and the built-in workers
/// When 20 mixed tasks are submitted
/// Then all complete and the running set drains
#[tokio::test]
async fn test_many_tasks_drain() {
    let orch = builder().max_concurrent_tasks(4).build().await.unwrap();

    let ids: Vec<_> = (0..20)
        .map(|i| {
            let category = TaskCategory::ALL[i % TaskCategory::ALL.len()];
            orch.create_task(&format!("batch item number {}", i), category)
                .unwrap()
                .id
        })
        .collect();
    assert!(orch.running_count() <= 4);

    wait_idle(&orch).await;
    let finished = join_all(ids.iter().map(|id| orch.wait_for(*id))).await;
    assert!(finished
        .into_iter()
        .all(|t| t.map(|t| t.status) == Some(TaskStatus::Completed)));
    assert_eq!(orch.get_all_reports().len(), 20);
}
