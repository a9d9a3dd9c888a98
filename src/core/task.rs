//! Task data model.
//!
//! A task is the unit of scheduling: a description, a category, and an
//! ordered plan of steps. Top-level status and retry bookkeeping belong to
//! the executor and the error handler; workers only touch steps and
//! `metadata`.

use crate::core::step::{Step, StepId, StepStatus};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Default retry budget fixed at plan time.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Free-form bag used by workers to hand artifacts between dependent steps.
pub type Metadata = BTreeMap<String, Value>;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The closed set of task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Research,
    Analysis,
    Creation,
    Automation,
    General,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Research,
        TaskCategory::Analysis,
        TaskCategory::Creation,
        TaskCategory::Automation,
        TaskCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Research => "research",
            TaskCategory::Analysis => "analysis",
            TaskCategory::Creation => "creation",
            TaskCategory::Automation => "automation",
            TaskCategory::General => "general",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskCategory {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        TaskCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| Error::UnknownCategory(s.to_string()))
    }
}

/// Task status in its lifecycle.
///
/// pending -> in_progress -> {completed | failed | retrying -> in_progress | cancelled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Statuses in which the executor is actively driving the task.
    pub fn is_live(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Retrying)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "running" => Ok(TaskStatus::InProgress),
            "retrying" => Ok(TaskStatus::Retrying),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::Validation(format!("unknown task status: {}", other))),
        }
    }
}

/// A planned unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub category: TaskCategory,
    pub status: TaskStatus,
    pub description: String,
    /// Insertion order is the planned execution order.
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    /// Only meaningful when `status` is `Completed`.
    pub result: Option<Value>,
    /// Only meaningful when `status` is `Failed`.
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Plan-time estimate, advisory only.
    pub estimated_duration_ms: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    /// Create a pending task from a plan.
    pub fn new(
        id: TaskId,
        category: TaskCategory,
        description: &str,
        steps: Vec<Step>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            category,
            status: TaskStatus::Pending,
            description: description.to_string(),
            steps,
            current_step_index: 0,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at,
            started_at: None,
            completed_at: None,
            estimated_duration_ms: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// Whether every declared dependency of the step at `index` is completed.
    ///
    /// Unknown dependency ids count as unmet.
    pub fn dependencies_met(&self, index: usize) -> bool {
        self.steps.get(index).is_some_and(|step| {
            step.dependencies
                .iter()
                .all(|dep| self.step(dep).is_some_and(Step::is_completed))
        })
    }

    pub fn completed_steps(&self) -> usize {
        self.count_steps(StepStatus::Completed)
    }

    pub fn failed_steps(&self) -> usize {
        self.count_steps(StepStatus::Failed)
    }

    fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Index of the first step still pending, if any.
    pub fn first_pending_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::Pending)
    }

    /// Move the step cursor.
    pub fn set_current_step(&mut self, index: usize) {
        self.current_step_index = index.min(self.steps.len());
    }

    /// Transition to `InProgress`, keeping the first start time across retries.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::InProgress;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(now);
    }

    /// Flip to `Cancelled` and fail any step caught mid-flight.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        for step in self
            .steps
            .iter_mut()
            .filter(|s| s.status == StepStatus::InProgress)
        {
            step.mark_failed("task cancelled", now);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
