//! Execution reports.
//!
//! A `Report` is a read-only projection of a task: counts, timing metrics,
//! the log stream, and a generated narrative. Generation is a pure
//! function of the task snapshot plus the clock, which is only consulted
//! for tasks that are still running.

mod narrative;

use crate::core::{Clock, LogEntry, StepStatus, SystemClock, Task, TaskCategory, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use narrative::{conclusion, recommendations};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub total_duration_ms: u64,
    pub average_step_duration_ms: u64,
    /// completed steps / total steps, 0 for an empty plan.
    pub success_rate: f64,
    /// retries / (retries + 1).
    pub retry_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub task_id: TaskId,
    pub category: TaskCategory,
    pub status: TaskStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub steps_failed: usize,
    pub retry_count: u32,
    pub logs: Vec<LogEntry>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub conclusion: String,
    pub metrics: ReportMetrics,
    pub recommendations: Vec<String>,
}

pub struct ReportGenerator {
    clock: Arc<dyn Clock>,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ReportGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Build the report for a task.
    ///
    /// When `logs` is empty a log stream is reconstructed from the step
    /// timestamps.
    pub fn generate(&self, task: &Task, logs: &[LogEntry]) -> Report {
        let metrics = self.metrics(task);
        let logs = if logs.is_empty() {
            synthesize_logs(task)
        } else {
            logs.to_vec()
        };

        Report {
            task_id: task.id,
            category: task.category,
            status: task.status,
            description: task.description.clone(),
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            steps_completed: task.completed_steps(),
            steps_total: task.steps.len(),
            steps_failed: task.failed_steps(),
            retry_count: task.retry_count,
            logs,
            result: task.result.clone(),
            error: task.error.clone(),
            conclusion: conclusion(task, &metrics),
            recommendations: recommendations(task, &metrics),
            metrics,
        }
    }

    pub fn metrics(&self, task: &Task) -> ReportMetrics {
        let total = task.steps.len();
        let success_rate = if total == 0 {
            0.0
        } else {
            task.completed_steps() as f64 / total as f64
        };
        let retries = task.retry_count as f64;

        let total_duration_ms = match (task.started_at, task.completed_at) {
            (Some(start), Some(end)) => millis_between(start, end),
            (Some(start), None) => millis_between(start, self.clock.now()),
            _ => 0,
        };

        let durations: Vec<u64> = task.steps.iter().filter_map(|s| s.duration_ms).collect();
        let average_step_duration_ms = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        ReportMetrics {
            total_duration_ms,
            average_step_duration_ms,
            success_rate,
            retry_rate: retries / (retries + 1.0),
        }
    }
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Rebuild a log stream from step timestamps.
fn synthesize_logs(task: &Task) -> Vec<LogEntry> {
    let mut logs = Vec::new();
    for step in &task.steps {
        if let Some(started) = step.started_at {
            logs.push(LogEntry::info(started, format!("Started {}", step.name)).for_step(&step.id));
        }
        let finished = step.completed_at.or(step.started_at);
        match (step.status, finished) {
            (StepStatus::Completed, Some(at)) => logs.push(
                LogEntry::success(at, format!("Completed {}", step.name)).for_step(&step.id),
            ),
            (StepStatus::Failed, Some(at)) => logs.push(
                LogEntry::error(
                    at,
                    format!(
                        "Failed {}: {}",
                        step.name,
                        step.error.as_deref().unwrap_or("unknown error")
                    ),
                )
                .for_step(&step.id),
            ),
            _ => {}
        }
    }
    logs.sort_by_key(|e| e.timestamp);
    logs
}
