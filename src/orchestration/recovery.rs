//! Failure classification, retry backoff and rollback.
//!
//! `ErrorHandler` is the only component allowed to touch a task's retry
//! bookkeeping. The executor asks it what to do with a failure, then asks
//! it to prepare the task for the next attempt or to roll it back.

use crate::core::{Task, TaskStatus};
use crate::error::Error;
use crate::{tlog, tlog_debug};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::LazyLock;
use std::time::Duration;

/// Network, timeout and availability vocabulary.
static TEMPORARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)network|time[ds]?\s?out|connection|unavailable|rate.?limit|too many requests|\b50[234]\b")
        .unwrap()
});

/// Syntax, validation and authorization vocabulary.
static NON_RECOVERABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)syntax|invalid|not found|unauthori[sz]ed|forbidden|permission denied").unwrap()
});

/// How a failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Recoverable,
    Temporary,
    NonRecoverable,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Recoverable => write!(f, "recoverable"),
            ErrorClass::Temporary => write!(f, "temporary"),
            ErrorClass::NonRecoverable => write!(f, "non_recoverable"),
        }
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter as a fraction of the exponential term.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_ratio: 0.3,
        }
    }
}

impl RetryPolicy {
    fn exponential_ms(&self, retry_count: u32) -> u64 {
        let base = self.base_delay.as_millis() as u64;
        base.saturating_mul(2u64.saturating_pow(retry_count))
    }

    /// `min(max_delay, base * 2^n)`, the delay with jitter ignored.
    pub fn expected_delay(&self, retry_count: u32) -> Duration {
        let capped = self
            .exponential_ms(retry_count)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// `min(max_delay, base * 2^n + jitter)` with jitter drawn uniformly
    /// from `[0, jitter_ratio * base * 2^n]`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exp = self.exponential_ms(retry_count);
        let jitter_max = exp as f64 * self.jitter_ratio.clamp(0.0, 1.0);
        let jitter = if jitter_max > 0.0 {
            rand::thread_rng().gen_range(0.0..=jitter_max) as u64
        } else {
            0
        };
        let capped = exp
            .saturating_add(jitter)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

/// Extra facts the caller knows about a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Intermediate artifacts can no longer be trusted.
    pub data_corrupted: bool,
}

impl ErrorContext {
    /// Facts the error itself carries.
    pub fn from_error(error: &Error) -> Self {
        Self {
            data_corrupted: matches!(error, Error::Step { data_corrupted: true, .. }),
        }
    }
}

/// What the executor should do next.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryDecision {
    pub should_retry: bool,
    /// Only set when `should_retry` is true.
    pub retry_delay: Option<Duration>,
    pub error_class: ErrorClass,
    pub message: String,
    pub rollback_needed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorHandler {
    policy: RetryPolicy,
}

impl ErrorHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Classify an error by kind first, then by keywords in its message.
    pub fn classify(&self, error: &Error) -> ErrorClass {
        match error {
            Error::UnknownCategory(_) | Error::TaskCancelled(_) => ErrorClass::NonRecoverable,
            Error::Timeout(_) => ErrorClass::Temporary,
            other => classify_message(&other.classification_text()),
        }
    }

    pub fn handle(&self, error: &Error, task: &Task, context: &ErrorContext) -> RecoveryDecision {
        let error_class = self.classify(error);
        let exhausted = task.retry_count >= task.max_retries;
        let should_retry = !exhausted && error_class != ErrorClass::NonRecoverable;
        let rollback_needed = (error_class == ErrorClass::NonRecoverable
            && task.completed_steps() > 0)
            || context.data_corrupted;

        let retry_delay = should_retry.then(|| self.policy.backoff_delay(task.retry_count));

        tlog_debug!(
            "ErrorHandler: task {} error class={} retry_count={}/{} should_retry={} rollback={}",
            task.id.short(),
            error_class,
            task.retry_count,
            task.max_retries,
            should_retry,
            rollback_needed
        );

        RecoveryDecision {
            should_retry,
            retry_delay,
            error_class,
            message: error.to_string(),
            rollback_needed,
        }
    }

    /// Count the retry and put failed steps back to pending.
    pub fn prepare_for_retry(&self, task: &mut Task) {
        task.retry_count = (task.retry_count + 1).min(task.max_retries);
        task.status = TaskStatus::Retrying;
        for step in task.steps.iter_mut().filter(|s| s.is_failed()) {
            step.reset();
        }
        let cursor = task.first_pending_index().unwrap_or(0);
        task.set_current_step(cursor);
        tlog!(
            "Task {} prepared for retry {}/{}",
            task.id.short(),
            task.retry_count,
            task.max_retries
        );
    }

    /// Throw away all completed work so the next attempt starts from scratch.
    pub fn perform_rollback(&self, task: &mut Task) {
        let mut demoted = 0usize;
        for step in task.steps.iter_mut().filter(|s| s.is_completed()) {
            step.demote("rollback performed");
            demoted += 1;
        }
        task.set_current_step(0);
        task.metadata.clear();
        task.metadata.insert(
            "rollback".to_string(),
            json!({ "performed": true, "steps_discarded": demoted }),
        );
        tlog!(
            "Task {} rolled back, {} completed steps discarded",
            task.id.short(),
            demoted
        );
    }
}

/// Keyword classification of a bare message.
pub fn classify_message(message: &str) -> ErrorClass {
    if TEMPORARY_RE.is_match(message) {
        ErrorClass::Temporary
    } else if NON_RECOVERABLE_RE.is_match(message) {
        ErrorClass::NonRecoverable
    } else {
        ErrorClass::Recoverable
    }
}
