//! Drives one task from start to a terminal status.
//!
//! The executor owns the retry loop: it runs the category worker, hands
//! failures to the `ErrorHandler`, sleeps the backoff and tries again until
//! the task completes, fails for good, or is cancelled.

use crate::core::{Clock, EntryLevel, LogEntry, Task, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::events::EventBus;
use crate::orchestration::recovery::{ErrorContext, ErrorHandler};
use crate::orchestration::worker::{Checkpoint, WorkerContext, WorkerRegistry};
use crate::util::format_duration_ms;
use crate::{tlog, tlog_debug, tlog_warn};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a finished run looked like from the outside.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    /// Worker invocations made, at most `max_retries + 1`.
    pub attempts: u32,
    pub duration_ms: u64,
}

pub struct Executor {
    workers: Arc<WorkerRegistry>,
    recovery: ErrorHandler,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl Executor {
    pub fn new(
        workers: Arc<WorkerRegistry>,
        recovery: ErrorHandler,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            workers,
            recovery,
            clock,
            events,
        }
    }

    pub fn recovery(&self) -> &ErrorHandler {
        &self.recovery
    }

    /// Run the task to a terminal status.
    ///
    /// # Errors
    /// `Error::TaskCancelled` if the task was already cancelled. Every
    /// other failure is recorded on the task and reported through the
    /// returned outcome.
    pub async fn run(
        &self,
        task: &mut Task,
        cancel: &CancellationToken,
        checkpoint: Checkpoint<'_>,
    ) -> Result<TaskOutcome> {
        if task.status == TaskStatus::Cancelled {
            return Err(Error::TaskCancelled(task.id.to_string()));
        }

        let mut logs = Vec::new();

        let Some(worker) = self.workers.get(task.category) else {
            let err = Error::UnknownCategory(task.category.to_string());
            logs.push(LogEntry::error(self.clock.now(), err.to_string()));
            self.finish_failed(task, &err.to_string());
            checkpoint(task);
            return Ok(self.outcome(task, logs, 0));
        };

        let from = task.status;
        task.start(self.clock.now());
        self.events.status_changed(task.id, from, task.status);
        logs.push(LogEntry::info(
            self.clock.now(),
            format!("Task started: {}", task.description),
        ));
        tlog!("Task {} started ({})", task.id.short(), task.category);
        checkpoint(task);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut ctx =
                WorkerContext::new(cancel.clone(), self.clock.clone()).with_checkpoint(checkpoint);
            let result = worker.execute(task, &mut ctx).await;
            logs.append(&mut ctx.logs);

            if cancel.is_cancelled() {
                self.finish_cancelled(task, &mut logs);
                checkpoint(task);
                return Ok(self.outcome(task, logs, attempts));
            }

            let err = match result {
                Ok(value) => {
                    let from = task.status;
                    task.complete(value, self.clock.now());
                    self.events.status_changed(task.id, from, task.status);
                    logs.push(LogEntry::success(self.clock.now(), "Task completed"));
                    tlog!(
                        "Task {} completed after {} attempt(s)",
                        task.id.short(),
                        attempts
                    );
                    checkpoint(task);
                    return Ok(self.outcome(task, logs, attempts));
                }
                Err(err) => err,
            };

            let decision = self
                .recovery
                .handle(&err, task, &ErrorContext::from_error(&err));
            logs.push(
                LogEntry::error(self.clock.now(), decision.message.clone()).with_metadata(json!({
                    "error_class": decision.error_class,
                    "attempt": attempts,
                })),
            );

            if !decision.should_retry {
                self.finish_failed(task, &decision.message);
                logs.push(LogEntry::error(
                    self.clock.now(),
                    format!("Task failed: {}", decision.message),
                ));
                checkpoint(task);
                return Ok(self.outcome(task, logs, attempts));
            }

            // Only a retried task is rolled back; a final failure keeps its
            // completed steps as evidence for the report.
            if decision.rollback_needed {
                self.recovery.perform_rollback(task);
                logs.push(LogEntry::warn(self.clock.now(), "Rollback performed"));
            }

            let from = task.status;
            self.recovery.prepare_for_retry(task);
            self.events.status_changed(task.id, from, task.status);
            checkpoint(task);

            let delay = decision.retry_delay.unwrap_or_default();
            logs.push(LogEntry::warn(
                self.clock.now(),
                format!(
                    "Retry {}/{} in {} ({})",
                    task.retry_count,
                    task.max_retries,
                    format_duration_ms(delay.as_millis() as u64),
                    decision.error_class
                ),
            ));
            tlog_warn!(
                "Task {} attempt {} failed ({}), retrying in {:?}",
                task.id.short(),
                attempts,
                decision.error_class,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finish_cancelled(task, &mut logs);
                    checkpoint(task);
                    return Ok(self.outcome(task, logs, attempts));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let from = task.status;
            task.start(self.clock.now());
            self.events.status_changed(task.id, from, task.status);
            checkpoint(task);
        }
    }

    /// Cancel a live task in place.
    ///
    /// Returns false when the task is not in progress or retrying.
    pub fn cancel(&self, task: &mut Task) -> bool {
        if !task.status.is_live() {
            return false;
        }
        let from = task.status;
        task.mark_cancelled(self.clock.now());
        self.events.status_changed(task.id, from, task.status);
        tlog!("Task {} cancelled", task.id.short());
        true
    }

    fn finish_failed(&self, task: &mut Task, message: &str) {
        let from = task.status;
        task.fail(message, self.clock.now());
        self.events.status_changed(task.id, from, task.status);
        tlog_warn!("Task {} failed: {}", task.id.short(), message);
    }

    fn finish_cancelled(&self, task: &mut Task, logs: &mut Vec<LogEntry>) {
        if task.status != TaskStatus::Cancelled {
            let from = task.status;
            task.mark_cancelled(self.clock.now());
            self.events.status_changed(task.id, from, task.status);
        }
        logs.push(LogEntry::warn(self.clock.now(), "Task cancelled"));
        tlog_debug!("Task {} stopped at cancellation", task.id.short());
    }

    fn outcome(&self, task: &Task, logs: Vec<LogEntry>, attempts: u32) -> TaskOutcome {
        let duration_ms = match (task.started_at, task.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        };
        TaskOutcome {
            success: task.status == TaskStatus::Completed,
            result: task.result.clone(),
            error: task.error.clone(),
            logs,
            attempts,
            duration_ms,
        }
    }
}
