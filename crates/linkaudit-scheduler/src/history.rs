//! Bounded, most-recent-first ledger of job lifecycle events.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::SchedulerError;
use crate::option_store::OptionStore;
use crate::status::{ScanState, ScanStatus};

/// Event tag of administrative reset entries.
pub const RESET_EVENT: &str = "reset";

/// Default number of entries kept per dataset.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Work done by a job, as reported at a terminal transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetrics {
    pub duration_secs: i64,
    pub processed_items: u64,
    pub total_items: u64,
    pub processed_batches: u64,
    pub total_batches: u64,
}

impl JobMetrics {
    /// Metrics derived from a status snapshot ending at `ended_at`.
    pub fn from_status(status: &ScanStatus, ended_at: i64) -> Self {
        let duration_secs = if status.started_at > 0 && ended_at >= status.started_at {
            ended_at - status.started_at
        } else {
            0
        };
        Self {
            duration_secs,
            processed_items: status.processed_items,
            total_items: status.total_items,
            processed_batches: status.processed_batches,
            total_batches: status.total_batches,
        }
    }

    /// Items per minute, when the duration is known.
    pub fn items_per_minute(&self) -> Option<f64> {
        if self.duration_secs <= 0 {
            return None;
        }
        Some(self.processed_items as f64 / (self.duration_secs as f64 / 60.0))
    }
}

/// How a job was triggered and whether immediate dispatch worked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerDiagnostics {
    pub manual_trigger_failed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manual_trigger_error: String,
    pub bypass_rest_window: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_via: Option<String>,
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Set for out-of-band events such as [`RESET_EVENT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub dataset: Dataset,
    #[serde(default)]
    pub job_id: String,
    pub state: ScanState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub is_full_scan: bool,
    #[serde(default)]
    pub scheduled_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub recorded_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<JobMetrics>,
    #[serde(default)]
    pub diagnostics: TriggerDiagnostics,
    /// Who caused the event (0 = system).
    #[serde(default)]
    pub actor: u64,
}

impl HistoryEntry {
    /// Snapshot of a status record.
    pub fn from_status(dataset: Dataset, status: &ScanStatus) -> Self {
        Self {
            event: None,
            dataset,
            job_id: status.job_id.clone(),
            state: status.state,
            message: status.message.clone(),
            attempt: status.attempt,
            is_full_scan: status.is_full_scan,
            scheduled_at: status.scheduled_at,
            started_at: (status.started_at > 0).then_some(status.started_at),
            ended_at: (status.ended_at > 0).then_some(status.ended_at),
            recorded_at: Utc::now().timestamp(),
            metrics: None,
            diagnostics: TriggerDiagnostics::default(),
            actor: status.requested_by,
        }
    }

    /// Administrative reset record. Carries no job metrics.
    pub fn reset(dataset: Dataset, actor: u64) -> Self {
        Self {
            event: Some(RESET_EVENT.to_string()),
            dataset,
            job_id: String::new(),
            state: ScanState::Idle,
            message: format!("{} scan status reset", dataset),
            attempt: 0,
            is_full_scan: false,
            scheduled_at: 0,
            started_at: None,
            ended_at: None,
            recorded_at: Utc::now().timestamp(),
            metrics: None,
            diagnostics: TriggerDiagnostics::default(),
            actor,
        }
    }

    pub fn with_metrics(mut self, metrics: JobMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: TriggerDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Whether this is a job entry in a terminal state.
    pub fn is_terminal_run(&self) -> bool {
        self.event.is_none() && self.state.is_terminal()
    }
}

/// Aggregates derived from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryInsights {
    pub total_runs: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `completed / (completed + failed)`, 0 without terminal runs.
    pub success_rate: f64,
    pub average_duration_secs: f64,
    pub average_items_per_minute: f64,
    pub last_terminal: Option<HistoryEntry>,
}

impl HistoryInsights {
    /// Compute insights over entries ordered most recent first.
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        let mut insights = HistoryInsights::default();
        let mut durations = Vec::new();
        let mut rates = Vec::new();

        for entry in entries.iter().filter(|e| e.is_terminal_run()) {
            insights.total_runs += 1;
            match entry.state {
                ScanState::Completed => insights.completed += 1,
                ScanState::Failed => insights.failed += 1,
                ScanState::Cancelled => insights.cancelled += 1,
                _ => {}
            }

            if let Some(metrics) = &entry.metrics {
                if metrics.duration_secs > 0 {
                    durations.push(metrics.duration_secs as f64);
                }
                if let Some(rate) = metrics.items_per_minute() {
                    rates.push(rate);
                }
            }

            if insights.last_terminal.is_none() {
                insights.last_terminal = Some(entry.clone());
            }
        }

        let decided = insights.completed + insights.failed;
        if decided > 0 {
            insights.success_rate = insights.completed as f64 / decided as f64;
        }
        insights.average_duration_secs = mean(&durations);
        insights.average_items_per_minute = mean(&rates);
        insights
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Append-only, capacity-bounded job history for one dataset.
#[derive(Clone)]
pub struct HistoryLedger {
    store: Arc<dyn OptionStore>,
    key: String,
    capacity: usize,
}

impl HistoryLedger {
    /// Create a ledger keeping at most `capacity` entries.
    pub fn new(store: Arc<dyn OptionStore>, dataset: Dataset, capacity: usize) -> Self {
        Self {
            store,
            key: dataset.history_key(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepend an entry, evicting the oldest beyond capacity. Returns the new length.
    pub async fn append(&self, entry: HistoryEntry) -> Result<usize, SchedulerError> {
        let capacity = self.capacity;
        let key = self.key.clone();
        let new_entry = serde_json::to_value(&entry)?;
        let value = self
            .store
            .update(
                &self.key,
                Box::new(move |current| {
                    let mut entries = decode_entries(&key, current);
                    entries.insert(0, new_entry);
                    entries.truncate(capacity);
                    Value::Array(entries)
                }),
            )
            .await?;
        let len = value.as_array().map_or(0, |a| a.len());
        debug!(
            "History '{}' appended {} for job '{}' ({} entries)",
            self.key, entry.state, entry.job_id, len
        );
        Ok(len)
    }

    /// Up to `limit` entries, most recent first.
    pub async fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, SchedulerError> {
        let value = self.store.get(&self.key).await?;
        let entries = decode_entries(&self.key, value)
            .into_iter()
            .take(limit)
            .filter_map(|v| match serde_json::from_value::<HistoryEntry>(v) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable history entry in '{}': {}", self.key, e);
                    None
                }
            })
            .collect();
        Ok(entries)
    }

    /// Aggregate statistics over every stored entry.
    pub async fn summarize(&self) -> Result<HistoryInsights, SchedulerError> {
        let entries = self.list(self.capacity).await?;
        Ok(HistoryInsights::from_entries(&entries))
    }
}

fn decode_entries(key: &str, value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!("Discarding non-list history '{}': {}", key, other);
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
