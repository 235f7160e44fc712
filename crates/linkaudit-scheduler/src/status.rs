//! Scan status record and its store.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::SchedulerError;
use crate::option_store::OptionStore;

/// Lifecycle state of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanState {
    /// A queued or running job is authoritative; nothing else may start.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanState::Queued | ScanState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Failed | ScanState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Queued => "queued",
            ScanState::Running => "running",
            ScanState::Completed => "completed",
            ScanState::Failed => "failed",
            ScanState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one dataset's scan. Timestamps are Unix seconds, 0 = unset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanStatus {
    pub state: ScanState,
    pub job_id: String,
    pub attempt: u32,
    pub is_full_scan: bool,
    pub requested_by: u64,
    pub current_batch: u64,
    pub processed_batches: u64,
    /// 0 while the total is still unknown.
    pub total_batches: u64,
    pub remaining_batches: u64,
    pub processed_items: u64,
    pub total_items: u64,
    pub message: String,
    pub last_error: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub scheduled_at: i64,
    pub next_batch_timestamp: i64,
}

impl ScanStatus {
    /// Whether a job must be treated as in flight.
    ///
    /// `remaining_batches > 0` is checked alongside the state so that a job
    /// whose state write was lost between two reads still blocks a new start.
    pub fn is_active(&self) -> bool {
        self.state.is_active() || self.remaining_batches > 0
    }

    /// Item progress as a percentage, when the total is known.
    pub fn progress_percent(&self) -> Option<f64> {
        if self.total_items == 0 {
            return None;
        }
        Some((self.processed_items as f64 / self.total_items as f64 * 100.0).min(100.0))
    }
}

/// Partial update merged into a [`ScanStatus`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub state: Option<ScanState>,
    pub job_id: Option<String>,
    pub attempt: Option<u32>,
    pub is_full_scan: Option<bool>,
    pub requested_by: Option<u64>,
    pub current_batch: Option<u64>,
    pub processed_batches: Option<u64>,
    pub total_batches: Option<u64>,
    pub remaining_batches: Option<u64>,
    pub processed_items: Option<u64>,
    pub total_items: Option<u64>,
    pub message: Option<String>,
    pub last_error: Option<String>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub scheduled_at: Option<i64>,
    pub next_batch_timestamp: Option<i64>,
}

impl StatusPatch {
    /// Patch that zeroes every progress counter.
    pub fn reset_progress() -> Self {
        Self {
            current_batch: Some(0),
            processed_batches: Some(0),
            total_batches: Some(0),
            remaining_batches: Some(0),
            processed_items: Some(0),
            total_items: Some(0),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: ScanState) -> Self {
        self.state = Some(state);
        self
    }

    /// Merge the set fields into `status`.
    pub fn apply(self, status: &mut ScanStatus) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { status.$field = value; })*
            };
        }
        merge!(
            state,
            job_id,
            attempt,
            is_full_scan,
            requested_by,
            current_batch,
            processed_batches,
            total_batches,
            remaining_batches,
            processed_items,
            total_items,
            message,
            last_error,
            started_at,
            ended_at,
            scheduled_at,
            next_batch_timestamp,
        );
    }
}

/// Durable record of one dataset's [`ScanStatus`].
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn OptionStore>,
    key: String,
}

impl StatusStore {
    /// Create a status store for a dataset.
    pub fn new(store: Arc<dyn OptionStore>, dataset: Dataset) -> Self {
        Self {
            store,
            key: dataset.status_key(),
        }
    }

    /// Current status, or a fresh idle record when none is stored.
    pub async fn get(&self) -> Result<ScanStatus, SchedulerError> {
        let value = self.store.get(&self.key).await?;
        Ok(decode_status(&self.key, value))
    }

    /// Merge `patch` into the stored record and return the result.
    pub async fn update(&self, patch: StatusPatch) -> Result<ScanStatus, SchedulerError> {
        self.update_with(move |status| patch.apply(status)).await
    }

    /// Atomically mutate the stored record and return the result.
    pub async fn update_with<F>(&self, f: F) -> Result<ScanStatus, SchedulerError>
    where
        F: FnOnce(&mut ScanStatus) + Send + 'static,
    {
        let key = self.key.clone();
        let value = self
            .store
            .update(
                &self.key,
                Box::new(move |current| {
                    let mut status = decode_status(&key, current);
                    f(&mut status);
                    serde_json::to_value(&status).unwrap_or_default()
                }),
            )
            .await?;
        let status: ScanStatus = serde_json::from_value(value)?;
        debug!("Status '{}' now {} (job '{}')", self.key, status.state, status.job_id);
        Ok(status)
    }

    /// Atomically mutate the stored record when `f` accepts the change.
    ///
    /// `f` returns `false` to leave the record untouched; the result is then `None`.
    pub async fn update_if<F>(&self, f: F) -> Result<Option<ScanStatus>, SchedulerError>
    where
        F: FnOnce(&mut ScanStatus) -> bool + Send + 'static,
    {
        let applied = Arc::new(AtomicBool::new(false));
        let flag = applied.clone();
        let status = self
            .update_with(move |status| {
                let original = status.clone();
                if f(status) {
                    flag.store(true, Ordering::SeqCst);
                } else {
                    *status = original;
                }
            })
            .await?;
        Ok(applied.load(Ordering::SeqCst).then_some(status))
    }

    /// Overwrite the stored record.
    pub async fn replace(&self, status: ScanStatus) -> Result<ScanStatus, SchedulerError> {
        self.store.set(&self.key, serde_json::to_value(&status)?).await?;
        Ok(status)
    }
}

fn decode_status(key: &str, value: Option<Value>) -> ScanStatus {
    match value {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Discarding unreadable status '{}': {}", key, e);
            ScanStatus::default()
        }),
        None => ScanStatus::default(),
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
