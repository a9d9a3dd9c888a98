//! Per-task execution log entries carried into reports.

use crate::core::step::StepId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl std::fmt::Display for EntryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryLevel::Info => write!(f, "info"),
            EntryLevel::Warn => write!(f, "warn"),
            EntryLevel::Error => write!(f, "error"),
            EntryLevel::Success => write!(f, "success"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: EntryLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, level: EntryLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
            step_id: None,
            metadata: None,
        }
    }

    pub fn info(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(timestamp, EntryLevel::Info, message)
    }

    pub fn warn(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(timestamp, EntryLevel::Warn, message)
    }

    pub fn error(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(timestamp, EntryLevel::Error, message)
    }

    pub fn success(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(timestamp, EntryLevel::Success, message)
    }

    pub fn for_step(mut self, step_id: &StepId) -> Self {
        self.step_id = Some(step_id.clone());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
