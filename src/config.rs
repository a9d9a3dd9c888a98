use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestration::{
    RestartPolicy, RetryPolicy, WorkerSettings, DEFAULT_MAX_CONCURRENT_TASKS,
};
use crate::{tlog_debug, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_concurrent_tasks: usize,
    pub max_retries: u32,
    pub restart_policy: RestartPolicy,
    pub state_path: Option<String>,
    pub retry: RetrySettings,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_retries: crate::core::DEFAULT_MAX_RETRIES,
            restart_policy: RestartPolicy::default(),
            state_path: None,
            retry: RetrySettings::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ratio: policy.jitter_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkerConfig {
    pub step_timeout_secs: Option<u64>,
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskpilot"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("taskpilot.toml"))
    }

    /// Where the task/report snapshot lives.
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::home_dir()?.join("state.json")),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter_ratio: self.retry.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            step_timeout: self.worker.step_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Validation(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }
        Ok(())
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        tlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        tlog_debug!(
            "Config loaded: max_concurrent_tasks={}, max_retries={}, restart_policy={:?}",
            config.max_concurrent_tasks,
            config.max_retries,
            config.restart_policy
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::home_dir()?;
        if !dir.exists() {
            tlog_debug!("Creating taskpilot directory");
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
