use super::{Snapshot, TaskStore, SNAPSHOT_VERSION};
use crate::error::{Error, Result};
use crate::{tlog, tlog_debug, tlog_trace};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot stored as pretty JSON in a single file.
///
/// Writes go to a temp file that is renamed over the target, and the
/// previous snapshot is kept next to it as `.json.bak`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }
}

impl TaskStore for JsonFileStore {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        tlog_debug!(
            "JsonFileStore::save tasks={} reports={}",
            snapshot.tasks.len(),
            snapshot.reports.len()
        );
        let contents = serde_json::to_string_pretty(snapshot)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                tlog_debug!("Creating state directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents)?;
        fs::rename(&temp_path, &self.path)?;
        tlog_trace!("Snapshot written to {} ({} bytes)", self.path.display(), contents.len());
        Ok(())
    }

    fn load(&self) -> Result<Snapshot> {
        tlog_debug!("JsonFileStore::load path={}", self.path.display());
        if !self.path.exists() {
            tlog_debug!("State file not found, starting empty");
            return Ok(Snapshot::default());
        }

        let mut snapshot: Snapshot = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::Validation(format!(
                "state file {} has version {}, newest supported is {}",
                self.path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }
        if snapshot.version < SNAPSHOT_VERSION {
            tlog!(
                "Upgrading state snapshot from version {} to {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
            snapshot.version = SNAPSHOT_VERSION;
        }

        tlog_debug!(
            "State loaded: {} tasks, {} reports",
            snapshot.tasks.len(),
            snapshot.reports.len()
        );
        Ok(snapshot)
    }
}

/// In-process store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of snapshots written so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }
}

impl TaskStore for MemoryStore {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.snapshot.lock() = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot.lock().clone())
    }
}
