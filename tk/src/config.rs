//! TaskKeeper configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::limiter::LimiterError;

/// Environment variable consulted for the concurrency ceiling
pub const MAX_CONCURRENT_ENV: &str = "MAX_CONCURRENT_EXECUTIONS";

/// Ceiling used when neither config nor environment set one
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Main TaskKeeper configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution queue settings
    pub queue: QueueConfig,

    /// Polling loop settings
    pub keeper: KeeperConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        self.queue
            .resolve_max_concurrent()
            .context("Invalid queue configuration")?;
        if self.keeper.poll_interval_secs == 0 {
            return Err(eyre::eyre!("keeper.poll-interval-secs must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskkeeper.yml
        let local_config = PathBuf::from(".taskkeeper.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskkeeper/taskkeeper.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskkeeper").join("taskkeeper.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Execution queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrency ceiling; falls back to MAX_CONCURRENT_EXECUTIONS, then 3
    #[serde(rename = "max-concurrent", skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    /// Event bus buffer size
    #[serde(rename = "event-capacity")]
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            event_capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Effective concurrency ceiling from config, then environment, then default
    pub fn resolve_max_concurrent(&self) -> Result<usize, LimiterError> {
        self.resolve_max_concurrent_with(|key| std::env::var(key).ok())
    }

    /// Same as [`resolve_max_concurrent`](Self::resolve_max_concurrent) with
    /// an explicit environment lookup
    pub fn resolve_max_concurrent_with<F>(&self, env: F) -> Result<usize, LimiterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = self.max_concurrent {
            debug!(n, "QueueConfig::resolve_max_concurrent: explicit value");
            return check_concurrency(n);
        }

        match env(MAX_CONCURRENT_ENV) {
            Some(raw) => {
                debug!(%raw, "QueueConfig::resolve_max_concurrent: from environment");
                parse_concurrency(&raw)
            }
            None => {
                debug!("QueueConfig::resolve_max_concurrent: using default");
                Ok(DEFAULT_MAX_CONCURRENT)
            }
        }
    }
}

/// Parse a concurrency ceiling; anything but a positive integer is rejected
pub fn parse_concurrency(raw: &str) -> Result<usize, LimiterError> {
    let n = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| LimiterError::InvalidConcurrency(raw.to_string()))?;
    check_concurrency(n)
}

fn check_concurrency(n: usize) -> Result<usize, LimiterError> {
    if n == 0 {
        return Err(LimiterError::InvalidConcurrency(n.to_string()));
    }
    Ok(n)
}

/// Polling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Seconds between checks for due tasks
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Simulated execution time per task in milliseconds
    #[serde(rename = "executor-delay-ms")]
    pub executor_delay_ms: u64,

    /// Newline-separated list of due task identifiers
    #[serde(rename = "due-tasks-file", skip_serializing_if = "Option::is_none")]
    pub due_tasks_file: Option<PathBuf>,

    /// Identifiers the simulated executor fails
    #[serde(rename = "fail-tasks")]
    pub fail_tasks: Vec<String>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            executor_delay_ms: 500,
            due_tasks_file: None,
            fail_tasks: Vec::new(),
        }
    }
}

impl KeeperConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn executor_delay(&self) -> Duration {
        Duration::from_millis(self.executor_delay_ms)
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append every queue event to this JSONL file
    #[serde(rename = "event-log", skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,
}
