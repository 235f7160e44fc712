//! Shared test doubles.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::dataset::Dataset;
use crate::dispatch::{DispatchReport, TriggerDispatcher};
use crate::error::SchedulerError;
use crate::option_store::{MemoryOptionStore, OptionStore};
use crate::scheduler::{JobScheduler, SchedulerOptions};
use crate::settings::{ScanSettings, SettingsReader};
use crate::substrate::{MemoryScheduler, ScheduledEvent, SchedulingPrimitive};

/// Memory substrate whose `schedule_once` fails a given number of times.
#[derive(Default)]
pub struct FlakySubstrate {
    pub inner: MemoryScheduler,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    erroring: bool,
}

impl FlakySubstrate {
    /// Refuse (`Ok(false)`) the next `failures` calls.
    pub fn refusing(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    /// Error on the next `failures` calls.
    pub fn erroring(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            erroring: true,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulingPrimitive for FlakySubstrate {
    async fn schedule_once(&self, run_at: i64, hook: &str, args: &Value) -> Result<bool, SchedulerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            if self.erroring {
                return Err(SchedulerError::Scheduling("substrate unavailable".to_string()));
            }
            return Ok(false);
        }
        self.inner.schedule_once(run_at, hook, args).await
    }

    async fn schedule_recurring(
        &self,
        first_run: i64,
        interval_secs: i64,
        hook: &str,
        args: &Value,
    ) -> Result<bool, SchedulerError> {
        self.inner.schedule_recurring(first_run, interval_secs, hook, args).await
    }

    async fn clear_scheduled(&self, hook: &str, args: Option<&Value>) -> Result<usize, SchedulerError> {
        self.inner.clear_scheduled(hook, args).await
    }

    async fn scheduled_event(&self, hook: &str, args: Option<&Value>) -> Result<Option<ScheduledEvent>, SchedulerError> {
        self.inner.scheduled_event(hook, args).await
    }

    async fn take_due(&self, now: i64) -> Result<Vec<ScheduledEvent>, SchedulerError> {
        self.inner.take_due(now).await
    }
}

/// Dispatcher that always reports a failed ping.
pub struct FailingDispatcher;

#[async_trait]
impl TriggerDispatcher for FailingDispatcher {
    async fn try_dispatch(&self) -> DispatchReport {
        DispatchReport::failure("connection refused")
    }
}

/// Settings reader standing in for an unreadable configuration file.
pub struct BrokenSettings;

impl SettingsReader for BrokenSettings {
    fn resolve(&self) -> Result<ScanSettings, SchedulerError> {
        Err(SchedulerError::InvalidSettings("bad time".to_string()))
    }
}

pub fn fast_options() -> SchedulerOptions {
    SchedulerOptions {
        retry_delay: Duration::from_millis(5),
        history_capacity: 50,
        queue_capacity: 10,
    }
}

/// Link scheduler over memory stores.
pub fn memory_scheduler<S: SchedulingPrimitive + 'static>(substrate: Arc<S>) -> JobScheduler {
    let store: Arc<dyn OptionStore> = Arc::new(MemoryOptionStore::new());
    JobScheduler::new(Dataset::Link, store, substrate, fast_options())
}
