//! Persisted FIFO of manual scan requests deferred while a scan is active.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::SchedulerError;
use crate::option_store::OptionStore;

/// A deferred manual scan request. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualQueueEntry {
    pub is_full_scan: bool,
    /// Requester id, 0 when unknown or system.
    #[serde(default)]
    pub requested_by: u64,
    /// Surface that produced the request, for diagnostics.
    #[serde(default)]
    pub context: String,
    pub enqueued_at: i64,
}

impl ManualQueueEntry {
    pub fn new(is_full_scan: bool, requested_by: u64, context: impl Into<String>) -> Self {
        Self {
            is_full_scan,
            requested_by,
            context: context.into(),
            enqueued_at: Utc::now().timestamp(),
        }
    }
}

/// Bounded manual request queue for one dataset.
///
/// Every mutation is a single atomic update of the stored list, so the
/// executor's completion callback and a new request may race safely.
#[derive(Clone)]
pub struct ManualRequestQueue {
    store: Arc<dyn OptionStore>,
    key: String,
    /// 0 = unlimited.
    capacity: usize,
}

impl ManualRequestQueue {
    pub fn new(store: Arc<dyn OptionStore>, dataset: Dataset, capacity: usize) -> Self {
        Self {
            store,
            key: dataset.queue_key(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append to the back. Rejected with [`SchedulerError::QueueFull`] at capacity.
    pub async fn enqueue(&self, entry: ManualQueueEntry) -> Result<usize, SchedulerError> {
        let capacity = self.capacity;
        let rejected = Arc::new(AtomicBool::new(false));
        let flag = rejected.clone();
        let key = self.key.clone();
        let new_entry = serde_json::to_value(&entry)?;

        let value = self
            .store
            .update(
                &self.key,
                Box::new(move |current| {
                    let mut entries = decode_entries(&key, current);
                    if capacity > 0 && entries.len() >= capacity {
                        flag.store(true, Ordering::SeqCst);
                    } else {
                        entries.push(new_entry);
                    }
                    Value::Array(entries)
                }),
            )
            .await?;

        if rejected.load(Ordering::SeqCst) {
            warn!("Manual queue '{}' full, rejecting request", self.key);
            return Err(SchedulerError::QueueFull { capacity });
        }
        let len = list_len(&value);
        info!("Manual queue '{}' enqueued request ({} waiting)", self.key, len);
        Ok(len)
    }

    /// Put an entry back at the front, ignoring capacity.
    pub async fn prepend(&self, entry: ManualQueueEntry) -> Result<usize, SchedulerError> {
        let key = self.key.clone();
        let new_entry = serde_json::to_value(&entry)?;
        let value = self
            .store
            .update(
                &self.key,
                Box::new(move |current| {
                    let mut entries = decode_entries(&key, current);
                    entries.insert(0, new_entry);
                    Value::Array(entries)
                }),
            )
            .await?;
        let len = list_len(&value);
        debug!("Manual queue '{}' restored front entry ({} waiting)", self.key, len);
        Ok(len)
    }

    pub async fn length(&self) -> Result<usize, SchedulerError> {
        Ok(self.entries().await?.len())
    }

    /// Snapshot of the waiting entries, front first.
    pub async fn entries(&self) -> Result<Vec<ManualQueueEntry>, SchedulerError> {
        let value = self.store.get(&self.key).await?;
        Ok(decode_entries(&self.key, value)
            .into_iter()
            .filter_map(|v| decode_entry(&self.key, v))
            .collect())
    }

    /// Remove and return the front entry.
    pub async fn pop_front(&self) -> Result<Option<ManualQueueEntry>, SchedulerError> {
        let popped: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let slot = popped.clone();
        let key = self.key.clone();

        self.store
            .update(
                &self.key,
                Box::new(move |current| {
                    let mut entries = decode_entries(&key, current);
                    if !entries.is_empty() {
                        let front = entries.remove(0);
                        if let Ok(mut slot) = slot.lock() {
                            *slot = Some(front);
                        }
                    }
                    Value::Array(entries)
                }),
            )
            .await?;

        let front = popped.lock().ok().and_then(|mut slot| slot.take());
        Ok(front.and_then(|v| decode_entry(&self.key, v)))
    }

    /// Drop every waiting entry and return how many there were.
    pub async fn clear(&self) -> Result<usize, SchedulerError> {
        let cleared = Arc::new(AtomicUsize::new(0));
        let count = cleared.clone();
        let key = self.key.clone();

        self.store
            .update(
                &self.key,
                Box::new(move |current| {
                    count.store(decode_entries(&key, current).len(), Ordering::SeqCst);
                    Value::Array(Vec::new())
                }),
            )
            .await?;

        let cleared = cleared.load(Ordering::SeqCst);
        if cleared > 0 {
            info!("Manual queue '{}' cleared {} request(s)", self.key, cleared);
        }
        Ok(cleared)
    }
}

fn list_len(value: &Value) -> usize {
    value.as_array().map_or(0, |a| a.len())
}

fn decode_entries(key: &str, value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!("Discarding non-list manual queue '{}': {}", key, other);
            Vec::new()
        }
    }
}

fn decode_entry(key: &str, value: Value) -> Option<ManualQueueEntry> {
    serde_json::from_value(value)
        .map_err(|e| warn!("Skipping unreadable queue entry in '{}': {}", key, e))
        .ok()
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
