use super::*;
use crate::dataset::Dataset;
use crate::error::SchedulerError;
use crate::settings::{ScanSettings, StaticSettings};
use crate::status::ScanState;
use crate::substrate::{MemoryScheduler, ScheduledEvent, SchedulingPrimitive};
use crate::test_support::{memory_scheduler, BrokenSettings};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Memory substrate whose next `fail_next` recurring registrations error.
#[derive(Default)]
struct FlakyRecurring {
    inner: MemoryScheduler,
    fail_next: AtomicU32,
}

#[async_trait]
impl SchedulingPrimitive for FlakyRecurring {
    async fn schedule_once(&self, run_at: i64, hook: &str, args: &Value) -> Result<bool, SchedulerError> {
        self.inner.schedule_once(run_at, hook, args).await
    }

    async fn schedule_recurring(
        &self,
        first_run: i64,
        interval_secs: i64,
        hook: &str,
        args: &Value,
    ) -> Result<bool, SchedulerError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SchedulerError::Scheduling("cron table locked".to_string()));
        }
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

#[tokio::test]
async fn test_reschedule_registers_cadence() {
    let substrate = Arc::new(MemoryScheduler::new());
    let scheduler = memory_scheduler(substrate.clone());

    let outcome = scheduler.reschedule_recurring_event("startup").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.context, "startup");
    assert_eq!(outcome.interval_secs, Some(24 * 3600));
    let next_run = outcome.next_run.unwrap();
    assert!(next_run > Utc::now().timestamp());

    let event = substrate
        .scheduled_event(&Dataset::Link.recurring_hook(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.run_at, next_run);

    // Rescheduling replaces rather than duplicates
    let again = scheduler.reschedule_recurring_event("settings").await.unwrap();
    assert!(again.success);
    assert_eq!(again.previous_run, Some(next_run));
    assert_eq!(substrate.pending().await.len(), 1);
}

#[tokio::test]
async fn test_reschedule_disabled_cadence_clears() {
    let substrate = Arc::new(MemoryScheduler::new());
    let scheduler = memory_scheduler(substrate.clone());
    scheduler.reschedule_recurring_event("startup").await.unwrap();

    let mut settings = ScanSettings::default();
    settings.cadence.enabled = false;
    let scheduler = scheduler.with_settings(Arc::new(StaticSettings(settings)));

    let outcome = scheduler.reschedule_recurring_event("settings").await.unwrap();
    assert!(outcome.success);
    assert!(outcome.next_run.is_none());
    assert!(substrate.pending().await.is_empty());
}

#[tokio::test]
async fn test_reschedule_failure_restores_previous() {
    let substrate = Arc::new(FlakyRecurring::default());
    let scheduler = memory_scheduler(substrate.clone());
    let first = scheduler.reschedule_recurring_event("startup").await.unwrap();
    assert!(first.success);

    substrate.fail_next.store(1, Ordering::SeqCst);
    let outcome = scheduler.reschedule_recurring_event("settings").await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("cron table locked"));
    assert_eq!(outcome.restored, Some(true));
    assert_eq!(outcome.previous_run, first.next_run);

    let restored = substrate
        .scheduled_event(&Dataset::Link.recurring_hook(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some(restored.run_at), first.next_run);
    assert_eq!(restored.interval_secs, first.interval_secs);
}

#[tokio::test]
async fn test_reschedule_reports_failed_restoration() {
    let substrate = Arc::new(FlakyRecurring::default());
    let scheduler = memory_scheduler(substrate.clone());
    scheduler.reschedule_recurring_event("startup").await.unwrap();

    substrate.fail_next.store(2, Ordering::SeqCst);
    let outcome = scheduler.reschedule_recurring_event("settings").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.restored, Some(false));
    assert!(substrate.inner.pending().await.is_empty());
}

#[tokio::test]
async fn test_reschedule_failure_without_previous() {
    let substrate = Arc::new(FlakyRecurring::default());
    substrate.fail_next.store(1, Ordering::SeqCst);
    let scheduler = memory_scheduler(substrate);

    let outcome = scheduler.reschedule_recurring_event("startup").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.restored, Some(false));
    assert!(outcome.previous_run.is_none());
}

#[tokio::test]
async fn test_reschedule_with_unreadable_settings_keeps_schedule() {
    let substrate = Arc::new(MemoryScheduler::new());
    let scheduler = memory_scheduler(substrate.clone());
    scheduler.reschedule_recurring_event("startup").await.unwrap();

    let scheduler = scheduler.with_settings(Arc::new(BrokenSettings));
    let outcome = scheduler.reschedule_recurring_event("settings").await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.restored.is_none());
    assert_eq!(substrate.pending().await.len(), 1);
}

#[tokio::test]
async fn test_recurring_scan_skips_when_active() {
    let substrate = Arc::new(MemoryScheduler::new());
    let scheduler = memory_scheduler(substrate);

    let first = scheduler.run_recurring_scan().await.unwrap();
    assert!(first.success);
    let status = scheduler.get_status().await.unwrap();
    assert_eq!(status.state, ScanState::Queued);
    assert!(!status.is_full_scan);

    let second = scheduler.run_recurring_scan().await.unwrap();
    assert!(!second.success);
    assert!(second.requires_confirmation);
    assert_eq!(scheduler.queue().length().await.unwrap(), 0);
}
