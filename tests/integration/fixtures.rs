//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Orchestrators with a fast retry policy
//! - Scripted failing handlers with call counters
//! - A research worker that reports corrupted sources once
//! - Gated handlers that hold a step until the test releases it
//! - An event sink that records everything it sees

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use taskpilot::core::{Metadata, Step, StepKind, Task, TaskCategory, TaskId, TaskStatus};
use taskpilot::orchestration::handlers::builtin_worker;
use taskpilot::orchestration::{
    handler_fn, EventSink, Orchestrator, OrchestratorBuilder, RetryPolicy, StepError,
    StepHandler, StepResult, TaskEvent, Worker,
};

/// Upper bound for any single wait in these tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_ratio: 0.0,
    }
}

/// Builder with millisecond backoff and an in-memory store.
pub fn builder() -> OrchestratorBuilder {
    Orchestrator::builder().retry_policy(fast_retry())
}

pub async fn wait_done(orch: &Orchestrator, id: TaskId) -> Task {
    tokio::time::timeout(WAIT_LIMIT, orch.wait_for(id))
        .await
        .expect("task did not finish in time")
        .expect("task disappeared")
}

pub async fn wait_idle(orch: &Orchestrator) {
    tokio::time::timeout(WAIT_LIMIT, orch.wait_idle())
        .await
        .expect("orchestrator did not go idle");
}

/// Poll `cond` until it holds or the wait limit passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Research worker whose verify step fails `failures` times with `message`.
pub fn flaky_research(failures: usize, message: &'static str) -> (Arc<dyn Worker>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let worker = builtin_worker(TaskCategory::Research).with_handler(
        StepKind::Verify,
        handler_fn(move |_, _, metadata| {
            if seen.fetch_add(1, Ordering::SeqCst) < failures {
                return Err(StepError::new(message));
            }
            let sources = metadata.get("sources").cloned().unwrap_or_else(|| json!([]));
            metadata.insert("verified_sources".to_string(), sources);
            Ok(json!({ "verified": true }))
        }),
    );
    (Arc::new(worker), calls)
}

/// Research worker whose verify step reports corrupted sources on its first
/// call. Returns the number of search runs.
pub fn corrupting_research() -> (Arc<dyn Worker>, Arc<AtomicUsize>) {
    let searches = Arc::new(AtomicUsize::new(0));
    let verifies = AtomicUsize::new(0);
    let s = searches.clone();
    let worker = builtin_worker(TaskCategory::Research)
        .with_handler(
            StepKind::Search,
            handler_fn(move |_, _, metadata| {
                let run = s.fetch_add(1, Ordering::SeqCst) + 1;
                metadata.insert(
                    "sources".to_string(),
                    json!([{ "title": "Notes", "topic": format!("run {}", run), "relevance": 1.0 }]),
                );
                Ok(json!({ "found": 1 }))
            }),
        )
        .with_handler(
            StepKind::Verify,
            handler_fn(move |_, _, metadata| {
                if verifies.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StepError::corrupted("sources failed checksum"));
                }
                let sources = metadata.get("sources").cloned().unwrap_or_else(|| json!([]));
                metadata.insert("verified_sources".to_string(), sources);
                Ok(json!({ "verified": true }))
            }),
        );
    (Arc::new(worker), searches)
}

/// Holds every step it handles until a permit is released.
pub struct Gate {
    permits: Semaphore,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(0),
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of steps ever held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Block until a permit is released.
    async fn pass(&self) -> Result<(), StepError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self.permits.acquire().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        permit
            .map_err(|e| StepError::new(format!("gate closed: {}", e)))?
            .forget();
        Ok(())
    }
}

pub struct GatedHandler(pub Arc<Gate>);

#[async_trait]
impl StepHandler for GatedHandler {
    async fn handle(&self, step: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
        self.0.pass().await?;
        metadata.insert("released".to_string(), json!(step.name));
        Ok(json!({ "description": description }))
    }
}

/// Verify handler that waits on the gate, then accepts every source.
pub struct GatedVerify(pub Arc<Gate>);

#[async_trait]
impl StepHandler for GatedVerify {
    async fn handle(&self, _: &Step, _: &str, metadata: &mut Metadata) -> StepResult {
        self.0.pass().await?;
        let sources = metadata.get("sources").cloned().unwrap_or_else(|| json!([]));
        metadata.insert("verified_sources".to_string(), sources);
        Ok(json!({ "verified": true }))
    }
}

/// General-category worker whose single execute step waits on `gate`.
pub fn gated_general(gate: Arc<Gate>) -> Arc<dyn Worker> {
    Arc::new(
        builtin_worker(TaskCategory::General)
            .with_handler(StepKind::Execute, Arc::new(GatedHandler(gate))),
    )
}

/// Research worker whose verify step waits on `gate` after search has run.
pub fn gated_research(gate: Arc<Gate>) -> Arc<dyn Worker> {
    Arc::new(
        builtin_worker(TaskCategory::Research)
            .with_handler(StepKind::Verify, Arc::new(GatedVerify(gate))),
    )
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().clone()
    }

    pub fn for_task(&self, id: TaskId) -> Vec<TaskEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id() == id)
            .cloned()
            .collect()
    }

    /// Target statuses of every status change for `id`, in order.
    pub fn statuses(&self, id: TaskId) -> Vec<TaskStatus> {
        self.for_task(id)
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::StatusChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn notify(&self, event: &TaskEvent) {
        self.events.lock().push(event.clone());
    }
}
