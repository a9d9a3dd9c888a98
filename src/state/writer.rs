//! Background snapshot writer.
//!
//! Callers hand over snapshots from synchronous code; a single Tokio task
//! saves them on the blocking pool. Snapshots are numbered under a lock as
//! they are submitted, so the channel carries them oldest first and the
//! writer only ever saves the newest one it has received.

use super::{Snapshot, TaskStore};
use crate::util::blocking;
use crate::{tlog_error, tlog_trace};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub struct SnapshotWriter {
    /// Sequence number of the last submitted snapshot.
    submitted: Mutex<u64>,
    tx: mpsc::UnboundedSender<(u64, Snapshot)>,
    written: watch::Receiver<u64>,
}

impl SnapshotWriter {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn TaskStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (written_tx, written) = watch::channel(0);
        tokio::spawn(write_loop(store, rx, written_tx));
        Self {
            submitted: Mutex::new(0),
            tx,
            written,
        }
    }

    /// Queue the snapshot produced by `take` for saving.
    ///
    /// `take` runs under the submission lock, so a snapshot taken later is
    /// always saved after (or instead of) one taken earlier.
    pub fn submit(&self, take: impl FnOnce() -> Snapshot) {
        let mut seq = self.submitted.lock();
        *seq += 1;
        if self.tx.send((*seq, take())).is_err() {
            tlog_error!("Snapshot writer stopped, state not persisted");
        }
    }

    /// Wait until everything submitted so far has been written (or failed).
    pub async fn flush(&self) {
        let target = *self.submitted.lock();
        let mut written = self.written.clone();
        let _ = written.wait_for(|seq| *seq >= target).await;
    }
}

async fn write_loop(
    store: Arc<dyn TaskStore>,
    mut rx: mpsc::UnboundedReceiver<(u64, Snapshot)>,
    written: watch::Sender<u64>,
) {
    while let Some(mut latest) = rx.recv().await {
        while let Ok(newer) = rx.try_recv() {
            latest = newer;
        }
        let (seq, snapshot) = latest;
        let tasks = snapshot.tasks.len();
        let store = store.clone();
        match blocking(move || store.save(&snapshot)).await {
            Ok(()) => tlog_trace!("Snapshot {} written ({} tasks)", seq, tasks),
            Err(e) => tlog_error!("Failed to persist {} tasks: {}", tasks, e),
        }
        written.send_replace(seq);
    }
}
