//! Diagnostic file logging for the task engine.
//!
//! Log levels:
//! - ERROR: Task failures the engine could not absorb, persistence failures
//! - WARN: Retries, rollbacks, cancellations, dropped events
//! - INFO: Task lifecycle (created, dispatched, finished)
//! - DEBUG: Step transitions, backoff delays, scheduling passes
//! - TRACE: Snapshot writes and event delivery
//!
//! Debug mode can be enabled with `--debug` flag or `TASKPILOT_DEBUG=1` env var.
//! Nothing is written until one of the `init*` functions has been called, so
//! library users and tests get a silent logger by default.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Initialize logging to ~/.taskpilot/taskpilot.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging in the default location with explicit debug mode.
pub fn init_with_debug(debug: bool) {
    if let Some(dir) = dirs::home_dir().map(|h| h.join(".taskpilot")) {
        let _ = std::fs::create_dir_all(&dir);
        init_at(&dir.join("taskpilot.log"), debug);
    } else {
        apply_level(debug);
    }
}

/// Initialize logging to an explicit file.
///
/// The file is truncated on startup. Only the first call wins the path;
/// later calls still update the level.
pub fn init_at(path: &Path, debug: bool) {
    apply_level(debug);
    let _ = std::fs::write(path, "");
    LOG_PATH.set(path.to_path_buf()).ok();
}

fn apply_level(debug: bool) {
    let env_debug = std::env::var("TASKPILOT_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let level = if debug_enabled {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Set the minimum log level for output.
pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Path of the active log file, if logging was initialised.
pub fn path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Only written in debug mode.
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! tlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! tlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! tlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! tlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
