//! Category workers and their step handlers.
//!
//! A `Worker` walks a task's steps in declared order, gating each on its
//! dependencies and dispatching it to the `StepHandler` registered for the
//! step's kind. The first handler failure marks the step failed and aborts
//! the run; deciding whether to try again belongs to the executor.

use crate::core::{
    Clock, EntryLevel, LogEntry, Metadata, Step, StepId, StepKind, Task, TaskCategory,
};
use crate::error::{Error, Result};
use crate::util::with_timeout;
use crate::{tlog_debug, tlog_warn};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a step handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    /// Output of earlier steps can no longer be trusted; the executor rolls
    /// the task back before retrying.
    pub data_corrupted: bool,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data_corrupted: false,
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data_corrupted: true,
        }
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

pub type StepResult = std::result::Result<Value, StepError>;

/// Runtime knobs shared by every worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSettings {
    /// Upper bound on a single handler call. `None` waits indefinitely.
    pub step_timeout: Option<Duration>,
}

/// Callback invoked whenever the task reaches a state worth persisting.
pub type Checkpoint<'a> = &'a (dyn Fn(&Task) + Send + Sync);

/// Per-run state handed to a worker by the executor.
pub struct WorkerContext<'a> {
    pub cancel: CancellationToken,
    pub clock: Arc<dyn Clock>,
    pub logs: Vec<LogEntry>,
    checkpoint: Option<Checkpoint<'a>>,
}

impl<'a> WorkerContext<'a> {
    pub fn new(cancel: CancellationToken, clock: Arc<dyn Clock>) -> Self {
        Self {
            cancel,
            clock,
            logs: Vec::new(),
            checkpoint: None,
        }
    }

    /// Report every step transition through `checkpoint`.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint<'a>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn checkpoint(&self, task: &Task) {
        if let Some(checkpoint) = self.checkpoint {
            checkpoint(task);
        }
    }

    pub fn log(&mut self, level: EntryLevel, message: impl Into<String>, step: Option<&StepId>) {
        let entry = LogEntry::new(self.clock.now(), level, message);
        self.logs.push(match step {
            Some(id) => entry.for_step(id),
            None => entry,
        });
    }
}

/// The work behind one step kind.
///
/// Handlers may read and write the task's metadata bag; that is how a
/// step's output reaches the steps that depend on it.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, step: &Step, description: &str, metadata: &mut Metadata)
        -> StepResult;
}

/// Adapts a plain function into a `StepHandler`.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&Step, &str, &mut Metadata) -> StepResult + Send + Sync,
{
    async fn handle(&self, step: &Step, description: &str, metadata: &mut Metadata) -> StepResult {
        (self.0)(step, description, metadata)
    }
}

pub fn handler_fn<F>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(&Step, &str, &mut Metadata) -> StepResult + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn category(&self) -> TaskCategory;

    /// Run every runnable step and return the aggregated result.
    ///
    /// # Errors
    /// `Error::Step` for the first failing step, `Error::TaskCancelled`
    /// when the token fires between steps.
    async fn execute(&self, task: &mut Task, ctx: &mut WorkerContext<'_>) -> Result<Value>;
}

pub type Aggregator = Arc<dyn Fn(&Task) -> Value + Send + Sync>;

/// A worker assembled from a handler per step kind and a result aggregator.
pub struct CategoryWorker {
    category: TaskCategory,
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
    aggregate: Aggregator,
    settings: WorkerSettings,
}

impl CategoryWorker {
    pub fn new(category: TaskCategory, aggregate: Aggregator) -> Self {
        Self {
            category,
            handlers: HashMap::new(),
            aggregate,
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_handler(mut self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn handles(&self, kind: StepKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[async_trait]
impl Worker for CategoryWorker {
    fn category(&self) -> TaskCategory {
        self.category
    }

    async fn execute(&self, task: &mut Task, ctx: &mut WorkerContext<'_>) -> Result<Value> {
        let exhausted = task.retry_count >= task.max_retries;

        for index in 0..task.steps.len() {
            if ctx.cancel.is_cancelled() {
                return Err(Error::TaskCancelled(task.id.to_string()));
            }

            let step = &task.steps[index];
            if step.is_completed() || (step.is_failed() && exhausted) {
                continue;
            }
            // Re-evaluated on every attempt since a retry can change outcomes.
            if !task.dependencies_met(index) {
                let id = step.id.clone();
                ctx.log(EntryLevel::Warn, "Skipped: dependencies not completed", Some(&id));
                continue;
            }

            task.set_current_step(index);
            let now = ctx.clock.now();
            task.steps[index].mark_in_progress(now);
            let step = task.steps[index].clone();
            ctx.log(EntryLevel::Info, format!("Started {}", step.name), Some(&step.id));
            tlog_debug!(
                "Worker[{}]: task {} step {} ({}) started",
                self.category,
                task.id.short(),
                step.id,
                step.kind
            );
            ctx.checkpoint(task);

            let outcome = match self.handlers.get(&step.kind) {
                Some(handler) => {
                    let call = handler.handle(&step, &task.description, &mut task.metadata);
                    match with_timeout(self.settings.step_timeout, call).await {
                        Ok(result) => result,
                        Err(Error::Timeout(limit)) => Err(StepError::new(format!(
                            "step timed out after {:?}",
                            limit
                        ))),
                        Err(other) => Err(StepError::new(other.to_string())),
                    }
                }
                None => Err(StepError::new(format!(
                    "invalid step kind {} for {} worker",
                    step.kind, self.category
                ))),
            };

            let now = ctx.clock.now();
            match outcome {
                Ok(value) => {
                    task.steps[index].mark_completed(value, now);
                    ctx.log(EntryLevel::Success, format!("Completed {}", step.name), Some(&step.id));
                    ctx.checkpoint(task);
                }
                Err(e) => {
                    task.steps[index].mark_failed(&e.message, now);
                    ctx.log(
                        EntryLevel::Error,
                        format!("Failed {}: {}", step.name, e.message),
                        Some(&step.id),
                    );
                    tlog_warn!(
                        "Worker[{}]: task {} step {} failed: {}{}",
                        self.category,
                        task.id.short(),
                        step.id,
                        e.message,
                        if e.data_corrupted { " (data corrupted)" } else { "" }
                    );
                    ctx.checkpoint(task);
                    return Err(Error::Step {
                        step_id: step.id.to_string(),
                        message: e.message,
                        data_corrupted: e.data_corrupted,
                    });
                }
            }
        }

        if let Some(stuck) = task.steps.iter().find(|s| !s.is_completed()) {
            return Err(Error::Step {
                step_id: stuck.id.to_string(),
                message: "dependencies never completed".to_string(),
                data_corrupted: false,
            });
        }

        task.set_current_step(task.steps.len());
        Ok((self.aggregate)(task))
    }
}

/// Category to worker lookup used by the executor.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<TaskCategory, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a deterministic built-in worker for every category.
    pub fn builtin(settings: &WorkerSettings) -> Self {
        let mut registry = Self::new();
        for category in TaskCategory::ALL {
            registry.register(Arc::new(
                crate::orchestration::handlers::builtin_worker(category)
                    .with_settings(settings.clone()),
            ));
        }
        registry
    }

    /// Register a worker, replacing any previous one for its category.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.category(), worker);
    }

    pub fn get(&self, category: TaskCategory) -> Option<Arc<dyn Worker>> {
        self.workers.get(&category).cloned()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
