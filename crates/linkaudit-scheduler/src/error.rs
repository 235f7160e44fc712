//! Scheduler errors.
//!
//! Only infrastructure faults are errors. Refused scheduling, busy scans and
//! dispatch hiccups are reported through the outcome types instead.

use thiserror::Error;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Option store or event table could not be read or written.
    #[error("Store error: {0}")]
    Store(String),

    /// Stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Scheduling substrate raised an error.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Manual request queue is at capacity.
    #[error("Manual request queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Settings could not be resolved.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Immediate dispatch client could not be built.
    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

impl From<tokio_rusqlite::Error> for SchedulerError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        SchedulerError::Store(e.to_string())
    }
}

impl From<linkaudit_config::ConfigError> for SchedulerError {
    fn from(e: linkaudit_config::ConfigError) -> Self {
        SchedulerError::InvalidSettings(e.to_string())
    }
}
