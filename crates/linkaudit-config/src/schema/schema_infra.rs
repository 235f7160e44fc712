//! Infrastructure configuration types (storage, logging, orchestrator, dispatch).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::linkaudit_dir;

/// Persistent storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding options and scheduled events.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    linkaudit_dir().join("linkaudit.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rolling log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    linkaudit_dir().join("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: default_log_dir(),
        }
    }
}

/// Job orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Delay before the second scheduling attempt, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Number of history entries kept per dataset.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Maximum pending manual requests (0 = unlimited).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Lower bound applied to `retry_delay_secs`.
pub const MIN_RETRY_DELAY_SECS: u64 = 5;

fn default_retry_delay() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    50
}

fn default_queue_capacity() -> usize {
    10
}

impl OrchestratorConfig {
    /// Retry delay with the minimum applied.
    pub fn effective_retry_delay_secs(&self) -> u64 {
        self.retry_delay_secs.max(MIN_RETRY_DELAY_SECS)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay(),
            history_capacity: default_history_capacity(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Immediate dispatch configuration: wakes the batch executor after a scan is queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Whether synchronous self-dispatch is allowed at all.
    #[serde(default)]
    pub enabled: bool,

    /// Wake-up endpoint of the batch executor.
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout in milliseconds.
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_ms: u64,
}

fn default_dispatch_timeout() -> u64 {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            timeout_ms: default_dispatch_timeout(),
        }
    }
}
