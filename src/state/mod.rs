//! Durable task and report snapshots.
//!
//! Persistence is a whole-snapshot overwrite: the orchestrator hands the
//! store every task and report it owns, and reads them all back on start.

mod store;
mod writer;

use crate::core::{Task, TaskId};
use crate::error::Result;
use crate::report::Report;
use crate::util::blocking;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use store::{JsonFileStore, MemoryStore};
pub use writer::SnapshotWriter;

/// Current on-disk snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// 0 marks a snapshot written before versioning.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub reports: Vec<Report>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl Snapshot {
    pub fn new(tasks: Vec<Task>, reports: Vec<Report>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            tasks,
            reports,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.reports.is_empty()
    }
}

/// Last-write-wins snapshot storage.
pub trait TaskStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Load the latest snapshot, or an empty one if nothing was saved yet.
    fn load(&self) -> Result<Snapshot>;
}

/// Load off the async runtime's worker threads.
pub async fn load_snapshot(store: Arc<dyn TaskStore>) -> Result<Snapshot> {
    blocking(move || store.load()).await
}

/// Remove a task and its report straight from the store.
///
/// Returns false if the snapshot has no such task. Nothing else in the
/// snapshot is touched, so queued work is not started.
pub async fn remove_task(store: Arc<dyn TaskStore>, id: TaskId) -> Result<bool> {
    let mut snapshot = load_snapshot(store.clone()).await?;
    let before = snapshot.tasks.len();
    snapshot.tasks.retain(|t| t.id != id);
    if snapshot.tasks.len() == before {
        return Ok(false);
    }
    snapshot.reports.retain(|r| r.task_id != id);
    blocking(move || store.save(&snapshot)).await?;
    Ok(true)
}
