//! Step data model.
//!
//! Steps are the atomic, dependency-gated units of a task. Workers move
//! them through their lifecycle only via the transition helpers here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a step, unique within its task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The operation a step performs.
///
/// Resolved once at plan time so workers dispatch on the kind instead
/// of re-parsing free-text step names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Search,
    Verify,
    Synthesize,
    Extraction,
    PatternDetection,
    Synthesis,
    Insights,
    Outline,
    Draft,
    Refine,
    Finalize,
    Execute,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Search => "search",
            StepKind::Verify => "verify",
            StepKind::Synthesize => "synthesize",
            StepKind::Extraction => "extraction",
            StepKind::PatternDetection => "pattern_detection",
            StepKind::Synthesis => "synthesis",
            StepKind::Insights => "insights",
            StepKind::Outline => "outline",
            StepKind::Draft => "draft",
            StepKind::Refine => "refine",
            StepKind::Finalize => "finalize",
            StepKind::Execute => "execute",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A single step of a task plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub description: String,
    pub kind: StepKind,
    pub status: StepStatus,
    /// Steps that must be completed before this one may start.
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    pub result: Option<Value>,
    /// Set iff `status` is `Failed`.
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl Step {
    pub fn new(id: StepId, kind: StepKind, name: &str, description: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            kind,
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Declare a dependency, ignoring duplicates.
    pub fn depends_on(mut self, dep: StepId) -> Self {
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    pub fn mark_in_progress(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::InProgress;
        self.error = None;
        self.started_at = Some(now);
        self.completed_at = None;
        self.duration_ms = None;
    }

    pub fn mark_completed(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.finish_clock(now);
    }

    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.to_string());
        self.finish_clock(now);
    }

    /// Demote a completed step to failed without touching its timing.
    pub fn demote(&mut self, reason: &str) {
        self.status = StepStatus::Failed;
        self.result = None;
        self.error = Some(reason.to_string());
    }

    /// Return the step to `Pending` with error and timestamps cleared.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    fn finish_clock(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
    }
}
