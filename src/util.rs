//! Shared utility functions.

use std::future::Future;
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{Error, Result};

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Race a future against an optional deadline.
///
/// `None` waits indefinitely.
pub async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match limit {
        Some(duration) => timeout(duration, fut)
            .await
            .map_err(|_| Error::Timeout(duration)),
        None => Ok(fut.await),
    }
}

/// Render a millisecond count for humans: `850ms`, `2.4s`, `3m 05s`.
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
