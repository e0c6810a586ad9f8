use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GuestError, Result};

/// Host-side configuration for the provisioning orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Directory holding provisioned guest records
    pub state_dir: PathBuf,

    /// Task dispatcher settings
    pub dispatcher: DispatcherConfig,

    /// Health monitor settings
    pub monitor: MonitorConfig,

    /// Capacity of the result broadcast channel
    pub event_capacity: usize,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            dispatcher: DispatcherConfig::default(),
            monitor: MonitorConfig::default(),
            event_capacity: 256,
            log_level: LogLevel::Info,
        }
    }
}

impl GuestConfig {
    /// Load configuration from a YAML file.
    ///
    /// Missing keys fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            GuestError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&data)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: GuestConfig = serde_yaml::from_str(data)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(GuestError::ConfigError(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.dispatcher.max_concurrency == Some(0) {
            return Err(GuestError::ConfigError(
                "dispatcher.max_concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default state directory (~/.a3s/guests).
pub fn default_state_dir() -> PathBuf {
    dirs_home().join("guests")
}

fn dirs_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".a3s"))
        .unwrap_or_else(|| PathBuf::from(".a3s"))
}

/// Dispatcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Ceiling on concurrently executing tasks (None = unbounded)
    pub max_concurrency: Option<usize>,

    /// Deadline applied to tasks whose context has none, in seconds
    pub task_timeout_secs: Option<u64>,
}

impl DispatcherConfig {
    /// Default task timeout as a duration.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Check interval in seconds
    pub interval_secs: u64,

    /// Warning threshold for guests in a non-terminal state
    pub in_flight_warning_threshold: usize,

    /// Warning threshold for executing tasks
    pub active_warning_threshold: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            in_flight_warning_threshold: 64,
            active_warning_threshold: 32,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}
