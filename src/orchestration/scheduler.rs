//! Orchestrator: the scheduling facade over planner, executor and reports.
//!
//! The orchestrator owns the canonical task and report collections. New
//! tasks are planned, stored and appended to a FIFO queue; the scheduling
//! pass admits queued tasks into the running set while it holds fewer than
//! `max_concurrent_tasks` entries and spawns one Tokio task per admission.
//! When a run ends its slot is freed, the report is generated, the snapshot
//! persisted and the pass runs again, so excess demand waits in the queue
//! instead of spawning unbounded work.
//!
//! All collections live behind one mutex that is never held across an
//! `.await`. Only the scheduling pass admits tasks into `running`. Snapshots
//! are handed to a `SnapshotWriter`, so disk I/O stays off the runtime.

use crate::config::Config;
use crate::core::{
    Clock, IdSource, LogEntry, StepStatus, SystemClock, Task, TaskCategory, TaskId, TaskStatus,
    UuidIds, DEFAULT_MAX_RETRIES,
};
use crate::error::{Error, Result};
use crate::orchestration::events::{EventBus, EventSink, TaskEvent};
use crate::orchestration::executor::Executor;
use crate::orchestration::planner::Planner;
use crate::orchestration::recovery::{ErrorHandler, RetryPolicy};
use crate::orchestration::worker::{Worker, WorkerRegistry, WorkerSettings};
use crate::report::{Report, ReportGenerator};
use crate::state::{load_snapshot, JsonFileStore, MemoryStore, Snapshot, SnapshotWriter, TaskStore};
use crate::{tlog, tlog_debug, tlog_error, tlog_warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;

/// What to do with tasks that were mid-run when the previous process died.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Reset in-flight steps and queue the task again ahead of pending work.
    #[default]
    Resume,
    /// Mark the task failed with "interrupted by restart".
    Fail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queued: usize,
    pub running: usize,
    pub max_concurrent_tasks: usize,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    reports: HashMap<TaskId, Report>,
    queue: VecDeque<TaskId>,
    running: HashMap<TaskId, CancellationToken>,
}

struct Inner {
    state: Mutex<SchedulerState>,
    writer: SnapshotWriter,
    changed: Notify,
    planner: Planner,
    executor: Executor,
    reporter: ReportGenerator,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    max_concurrent: usize,
}

/// How a spawned run ended.
enum RunEnd {
    Finished(Box<Task>, Vec<LogEntry>),
    Crashed(String),
}

/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Plan, store and enqueue a task, then run the scheduling pass.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `Error::Planning` for a blank description or an infeasible plan;
    /// nothing is stored in that case.
    pub fn create_task(&self, description: &str, category: TaskCategory) -> Result<Task> {
        let task = self.inner.planner.plan_feasible(description, category)?;
        let id = task.id;
        {
            let mut state = self.inner.state.lock();
            state.tasks.insert(id, task.clone());
            state.queue.push_back(id);
        }
        tlog!(
            "Task {} created ({}, {} steps): {}",
            id.short(),
            category,
            task.steps.len(),
            task.description
        );
        self.persist();
        self.inner.events.emit(TaskEvent::Created {
            task_id: id,
            category,
        });
        self.inner.changed.notify_waiters();
        self.schedule();
        Ok(task)
    }

    /// Admit queued tasks while there is spare capacity.
    fn schedule(&self) {
        let mut admitted = Vec::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            loop {
                if state.running.len() >= self.inner.max_concurrent {
                    break;
                }
                let Some(id) = state.queue.pop_front() else {
                    break;
                };
                let Some(task) = state.tasks.get(&id) else {
                    continue;
                };
                if task.is_finished() {
                    continue;
                }
                let token = CancellationToken::new();
                state.running.insert(id, token.clone());
                admitted.push((task.clone(), token));
            }
        }

        for (task, token) in admitted {
            tlog_debug!(
                "Scheduler: dispatching task {} ({} slots)",
                task.id.short(),
                self.inner.max_concurrent
            );
            self.dispatch(task, token);
        }
    }

    fn dispatch(&self, task: Task, token: CancellationToken) {
        let id = task.id;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            // A nested spawn turns a panicking worker into a JoinError we can record.
            let run = {
                let inner = inner.clone();
                let token = token.clone();
                let mut task = task;
                tokio::spawn(async move {
                    let checkpoint = |t: &Task| inner.checkpoint(t);
                    let result = inner.executor.run(&mut task, &token, &checkpoint).await;
                    (task, result)
                })
            };

            let end = match run.await {
                Ok((task, Ok(outcome))) => RunEnd::Finished(Box::new(task), outcome.logs),
                Ok((task, Err(e))) => {
                    tlog_debug!("Scheduler: task {} not run: {}", id.short(), e);
                    RunEnd::Finished(Box::new(task), Vec::new())
                }
                Err(e) => RunEnd::Crashed(e.to_string()),
            };
            Orchestrator { inner }.finish(id, end);
        });
    }

    /// Record the end of a run, free its slot and refill the running set.
    fn finish(&self, id: TaskId, end: RunEnd) {
        let now = self.inner.clock.now();
        let mut status_change = None;
        let recorded = {
            let mut state = self.inner.state.lock();
            state.running.remove(&id);
            match state.tasks.get(&id).cloned() {
                None => false,
                Some(current) => {
                    let (mut task, logs) = match end {
                        RunEnd::Finished(task, logs) => (*task, logs),
                        RunEnd::Crashed(message) => {
                            let err = Error::Orchestration(message);
                            tlog_error!("Task {} crashed: {}", id.short(), err);
                            let mut task = current.clone();
                            for step in task
                                .steps
                                .iter_mut()
                                .filter(|s| s.status == StepStatus::InProgress)
                            {
                                step.mark_failed(&err.to_string(), now);
                            }
                            let from = task.status;
                            task.fail(&err.to_string(), now);
                            status_change = Some((from, task.status));
                            (task, Vec::new())
                        }
                    };
                    if current.status == TaskStatus::Cancelled
                        && task.status != TaskStatus::Cancelled
                    {
                        task.mark_cancelled(now);
                    }
                    let report = self.inner.reporter.generate(&task, &logs);
                    state.reports.insert(id, report);
                    state.tasks.insert(id, task);
                    true
                }
            }
        };

        if recorded {
            tlog_debug!("Scheduler: task {} finished, report stored", id.short());
            self.persist();
            if let Some((from, to)) = status_change {
                self.inner.events.status_changed(id, from, to);
            }
            self.inner.events.emit(TaskEvent::Updated { task_id: id });
            self.inner.events.emit(TaskEvent::ReportReady { task_id: id });
        }
        self.inner.changed.notify_waiters();
        self.schedule();
    }

    /// Cancel a queued or running task.
    ///
    /// A queued task is removed from the queue and never dispatched. A
    /// running task is flagged cancelled at once and stops at its next step
    /// boundary; it leaves the running set when that run returns. Returns
    /// false for unknown or already finished tasks.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let now = self.inner.clock.now();
        let mut report_ready = false;
        let cancelled = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(task) = state.tasks.get_mut(&id) else {
                return false;
            };
            // A run can reach a terminal status before `finish` frees its slot.
            if task.is_finished() {
                return false;
            }

            if let Some(pos) = state.queue.iter().position(|q| *q == id) {
                state.queue.remove(pos);
                let from = task.status;
                task.mark_cancelled(now);
                self.inner.events.status_changed(id, from, task.status);
                let report = self.inner.reporter.generate(task, &[]);
                state.reports.insert(id, report);
                report_ready = true;
                true
            } else if let Some(token) = state.running.get(&id) {
                token.cancel();
                if !self.inner.executor.cancel(task) {
                    let from = task.status;
                    task.mark_cancelled(now);
                    self.inner.events.status_changed(id, from, task.status);
                }
                true
            } else {
                false
            }
        };

        if cancelled {
            tlog!("Task {} cancelled", id.short());
            self.persist();
            if report_ready {
                self.inner.events.emit(TaskEvent::ReportReady { task_id: id });
            }
            self.inner.changed.notify_waiters();
        }
        cancelled
    }

    /// Remove a task and its report. A running task is cancelled first.
    pub fn delete_task(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.tasks.remove(&id).is_some();
            state.reports.remove(&id);
            state.queue.retain(|q| *q != id);
            if let Some(token) = state.running.get(&id) {
                token.cancel();
            }
            removed
        };
        if removed {
            tlog!("Task {} deleted", id.short());
            self.persist();
            self.inner.events.emit(TaskEvent::Deleted { task_id: id });
            self.inner.changed.notify_waiters();
        }
        removed
    }

    pub fn get_task_status(&self, id: TaskId) -> Option<Task> {
        self.inner.state.lock().tasks.get(&id).cloned()
    }

    /// Every task, oldest first.
    pub fn get_all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.state.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        tasks
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.get_all_tasks()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    pub fn get_report(&self, id: TaskId) -> Option<Report> {
        self.inner.state.lock().reports.get(&id).cloned()
    }

    pub fn get_all_reports(&self) -> Vec<Report> {
        let mut reports: Vec<Report> = self.inner.state.lock().reports.values().cloned().collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        reports
    }

    pub fn get_stats(&self) -> OrchestratorStats {
        let state = self.inner.state.lock();
        let mut stats = OrchestratorStats {
            total: state.tasks.len(),
            queued: state.queue.len(),
            running: state.running.len(),
            max_concurrent_tasks: self.inner.max_concurrent,
            ..Default::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Retrying => stats.retrying += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_running(&self, id: TaskId) -> bool {
        self.inner.state.lock().running.contains_key(&id)
    }

    /// Wait until the task is terminal and out of the running set.
    ///
    /// The final snapshot has been written by the time this returns.
    /// Returns `None` if the task does not exist or gets deleted.
    pub async fn wait_for(&self, id: TaskId) -> Option<Task> {
        let task = loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock();
                let task = state.tasks.get(&id)?;
                if task.is_finished() && !state.running.contains_key(&id) {
                    break task.clone();
                }
            }
            notified.await;
        };
        self.flush().await;
        Some(task)
    }

    /// Wait until nothing is queued or running and the state is on disk.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock();
                if state.queue.is_empty() && state.running.is_empty() {
                    break;
                }
            }
            notified.await;
        }
        self.flush().await;
    }

    /// Wait until every state change made so far has been saved.
    pub async fn flush(&self) {
        self.inner.writer.flush().await;
    }

    /// Queue every task and report for saving. Failures are logged only.
    fn persist(&self) {
        self.inner.persist();
    }
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot::new(
            state.tasks.values().cloned().collect(),
            state.reports.values().cloned().collect(),
        )
    }

    fn persist(&self) {
        self.writer.submit(|| self.snapshot());
    }

    /// Mirror a running task's progress into the canonical map.
    fn checkpoint(&self, task: &Task) {
        let updated = {
            let mut state = self.state.lock();
            match state.tasks.get_mut(&task.id) {
                Some(stored) if stored.status != TaskStatus::Cancelled => {
                    *stored = task.clone();
                    true
                }
                _ => false,
            }
        };
        if updated {
            self.persist();
            self.events.emit(TaskEvent::Updated { task_id: task.id });
        }
    }
}

pub struct OrchestratorBuilder {
    max_concurrent_tasks: usize,
    max_retries: u32,
    retry_policy: RetryPolicy,
    worker_settings: WorkerSettings,
    restart_policy: RestartPolicy,
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    registry: Option<WorkerRegistry>,
    extra_workers: Vec<Arc<dyn Worker>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_policy: RetryPolicy::default(),
            worker_settings: WorkerSettings::default(),
            restart_policy: RestartPolicy::default(),
            store: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIds),
            registry: None,
            extra_workers: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

impl OrchestratorBuilder {
    /// Builder preloaded from config, persisting to the configured state file.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::default()
            .max_concurrent_tasks(config.max_concurrent_tasks)
            .max_retries(config.max_retries)
            .retry_policy(config.retry_policy())
            .worker_settings(config.worker_settings())
            .restart_policy(config.restart_policy)
            .store(Arc::new(JsonFileStore::new(config.state_path()?))))
    }

    pub fn max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn worker_settings(mut self, settings: WorkerSettings) -> Self {
        self.worker_settings = settings;
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the built-in workers entirely.
    pub fn workers(mut self, registry: WorkerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the worker for one category.
    pub fn worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.extra_workers.push(worker);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Load persisted state, apply the restart policy and start scheduling.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn build(self) -> Result<Orchestrator> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        let mut registry = self
            .registry
            .unwrap_or_else(|| WorkerRegistry::builtin(&self.worker_settings));
        for worker in self.extra_workers {
            registry.register(worker);
        }

        let events = Arc::new(EventBus::new());
        for sink in self.sinks {
            events.register(sink);
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn TaskStore>);
        let snapshot = load_snapshot(store.clone()).await?;

        let planner =
            Planner::new(self.ids, self.clock.clone()).with_max_retries(self.max_retries);
        let executor = Executor::new(
            Arc::new(registry),
            ErrorHandler::new(self.retry_policy),
            self.clock.clone(),
            events.clone(),
        );
        let reporter = ReportGenerator::new(self.clock.clone());

        let recovered = recover(
            snapshot,
            self.restart_policy,
            &reporter,
            self.clock.as_ref(),
        );

        let orchestrator = Orchestrator {
            inner: Arc::new(Inner {
                state: Mutex::new(recovered.state),
                writer: SnapshotWriter::spawn(store),
                changed: Notify::new(),
                planner,
                executor,
                reporter,
                events,
                clock: self.clock,
                max_concurrent: self.max_concurrent_tasks,
            }),
        };

        if !recovered.transitions.is_empty() {
            orchestrator.persist();
            for (id, from, to) in recovered.transitions {
                orchestrator.inner.events.status_changed(id, from, to);
            }
            orchestrator.flush().await;
        }
        tlog!(
            "Orchestrator ready: capacity {}, {} tasks loaded, {} queued",
            orchestrator.inner.max_concurrent,
            orchestrator.get_stats().total,
            orchestrator.queued_count()
        );
        orchestrator.schedule();
        Ok(orchestrator)
    }
}

struct Recovered {
    state: SchedulerState,
    transitions: Vec<(TaskId, TaskStatus, TaskStatus)>,
}

/// Rebuild scheduler state from a snapshot.
///
/// Pending tasks are queued in creation order. Tasks that were mid-run are
/// either queued again ahead of them or failed, per `policy`.
fn recover(
    snapshot: Snapshot,
    policy: RestartPolicy,
    reporter: &ReportGenerator,
    clock: &dyn Clock,
) -> Recovered {
    let mut state = SchedulerState::default();
    let mut transitions = Vec::new();
    let mut resumed = Vec::new();
    let mut pending = Vec::new();

    for report in snapshot.reports {
        state.reports.insert(report.task_id, report);
    }

    let mut tasks = snapshot.tasks;
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    for mut task in tasks {
        let id = task.id;
        match task.status {
            TaskStatus::Pending => pending.push(id),
            TaskStatus::InProgress | TaskStatus::Retrying => {
                let from = task.status;
                match policy {
                    RestartPolicy::Resume => {
                        for step in task
                            .steps
                            .iter_mut()
                            .filter(|s| s.status == StepStatus::InProgress)
                        {
                            step.reset();
                        }
                        task.status = TaskStatus::Pending;
                        tlog_warn!("Resuming task {} interrupted by restart", id.short());
                        resumed.push(id);
                    }
                    RestartPolicy::Fail => {
                        let now = clock.now();
                        for step in task
                            .steps
                            .iter_mut()
                            .filter(|s| s.status == StepStatus::InProgress)
                        {
                            step.mark_failed("interrupted by restart", now);
                        }
                        task.fail("interrupted by restart", now);
                        state.reports.insert(id, reporter.generate(&task, &[]));
                        tlog_warn!("Task {} failed: interrupted by restart", id.short());
                    }
                }
                transitions.push((id, from, task.status));
            }
            _ => {}
        }
        state.tasks.insert(id, task);
    }

    state.queue.extend(resumed);
    state.queue.extend(pending);
    Recovered { state, transitions }
}
