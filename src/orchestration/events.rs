//! Task lifecycle notifications.
//!
//! Observers register an `EventSink` with the `EventBus` owned by the
//! orchestrator. Delivery is fire-and-forget: a sink must never block the
//! caller, so the channel sink drops events when its buffer is full.

use crate::core::{TaskCategory, TaskId, TaskStatus};
use crate::{tlog_debug, tlog_trace};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted as tasks move through the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A task was planned and queued.
    Created {
        task_id: TaskId,
        category: TaskCategory,
    },
    /// Stored task state changed without a status change.
    Updated { task_id: TaskId },
    StatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// A fresh report is available for the task.
    ReportReady { task_id: TaskId },
    Deleted { task_id: TaskId },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Created { task_id, .. }
            | TaskEvent::Updated { task_id }
            | TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::ReportReady { task_id }
            | TaskEvent::Deleted { task_id } => *task_id,
        }
    }
}

/// Receives lifecycle events.
///
/// Called synchronously by the engine, sometimes while it holds internal
/// locks, so implementations must return quickly and must not call back
/// into the orchestrator.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &TaskEvent);
}

/// Forwards events into a bounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<TaskEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: &TaskEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tlog_debug!("ChannelSink: dropped event for {}: {}", event.task_id().short(), e);
        }
    }
}

/// Writes every event to the diagnostic log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: &TaskEvent) {
        match event {
            TaskEvent::StatusChanged { task_id, from, to } => {
                tlog_debug!("event: task {} {} -> {}", task_id.short(), from, to)
            }
            other => tlog_debug!("event: {:?}", other),
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    pub fn emit(&self, event: TaskEvent) {
        let sinks = self.sinks.read();
        tlog_trace!("Delivering {:?} to {} sinks", event, sinks.len());
        for sink in sinks.iter() {
            sink.notify(&event);
        }
    }

    /// Emit a status change, skipping no-op transitions.
    pub fn status_changed(&self, task_id: TaskId, from: TaskStatus, to: TaskStatus) {
        if from != to {
            self.emit(TaskEvent::StatusChanged { task_id, from, to });
        }
    }
}
