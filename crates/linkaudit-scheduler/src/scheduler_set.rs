//! Per-dataset schedulers sharing one substrate, and the polling cycle.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::dataset::Dataset;
use crate::dispatch::TriggerDispatcher;
use crate::error::SchedulerError;
use crate::option_store::OptionStore;
use crate::scheduler::{JobScheduler, ScanOutcome, SchedulerOptions};
use crate::scheduler_recurring::RescheduleOutcome;
use crate::settings::{IdentityProvider, SettingsReader};
use crate::substrate::{ScheduledEvent, SchedulingPrimitive};

/// A batch trigger handed to the external executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueBatch {
    pub dataset: Dataset,
    pub hook: String,
    pub job_id: String,
    pub args: Value,
    pub run_at: i64,
}

/// An automatic scan fired during a polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringRun {
    pub dataset: Dataset,
    pub outcome: ScanOutcome,
}

/// Everything one polling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub batches: Vec<DueBatch>,
    pub recurring: Vec<RecurringRun>,
    /// Batch triggers of jobs that are no longer authoritative.
    pub stale: usize,
    /// Events whose hook belongs to no dataset.
    pub unknown: usize,
    /// Events that could not be handled this cycle.
    #[serde(default)]
    pub failed: Vec<TickFailure>,
}

/// An event whose handling failed during a polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickFailure {
    pub dataset: Dataset,
    pub hook: String,
    pub error: String,
}

/// One [`JobScheduler`] per dataset.
pub struct SchedulerSet {
    schedulers: HashMap<Dataset, Arc<JobScheduler>>,
    substrate: Arc<dyn SchedulingPrimitive>,
}

impl SchedulerSet {
    /// Build schedulers for every dataset over shared stores.
    pub fn new(
        store: Arc<dyn OptionStore>,
        substrate: Arc<dyn SchedulingPrimitive>,
        options: SchedulerOptions,
        dispatcher: Arc<dyn TriggerDispatcher>,
        settings: Arc<dyn SettingsReader>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let schedulers = Dataset::ALL
            .into_iter()
            .map(|dataset| {
                let scheduler = JobScheduler::new(dataset, store.clone(), substrate.clone(), options.clone())
                    .with_dispatcher(dispatcher.clone())
                    .with_settings(settings.clone())
                    .with_identity(identity.clone());
                (dataset, Arc::new(scheduler))
            })
            .collect();
        Self { schedulers, substrate }
    }

    pub fn get(&self, dataset: Dataset) -> Result<Arc<JobScheduler>, SchedulerError> {
        self.schedulers
            .get(&dataset)
            .cloned()
            .ok_or_else(|| SchedulerError::InvalidSettings(format!("no scheduler for dataset '{}'", dataset)))
    }

    /// Schedulers in dataset order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<JobScheduler>> + '_ {
        Dataset::ALL
            .into_iter()
            .filter_map(|dataset| self.schedulers.get(&dataset).cloned())
    }

    /// Run one substrate polling cycle at `now` (Unix seconds).
    ///
    /// Recurring triggers start automatic scans here; batch triggers of the
    /// current job are returned for the executor, stale ones are dropped.
    /// Each event is handled on its own: a failing event is recorded in the
    /// report and, when one-shot, put back for the next cycle.
    pub async fn tick(&self, now: i64) -> Result<TickReport, SchedulerError> {
        let due = self.substrate.take_due(now).await?;
        let mut report = TickReport::default();

        for event in due {
            let Some(dataset) = Dataset::from_hook(&event.hook) else {
                warn!("Dropping event with unknown hook '{}'", event.hook);
                report.unknown += 1;
                continue;
            };

            if let Err(e) = self.process_event(dataset, &event, &mut report).await {
                warn!("Event '{}' failed during tick: {}", event.hook, e);
                if event.interval_secs.is_none() {
                    self.restore_event(&event).await;
                }
                report.failed.push(TickFailure {
                    dataset,
                    hook: event.hook,
                    error: e.to_string(),
                });
            }
        }

        if !report.batches.is_empty() || !report.recurring.is_empty() || !report.failed.is_empty() {
            info!(
                "Tick: {} batch(es) due, {} recurring run(s), {} stale, {} failed",
                report.batches.len(),
                report.recurring.len(),
                report.stale,
                report.failed.len()
            );
        }
        Ok(report)
    }

    async fn process_event(
        &self,
        dataset: Dataset,
        event: &ScheduledEvent,
        report: &mut TickReport,
    ) -> Result<(), SchedulerError> {
        let scheduler = self.get(dataset)?;

        if event.hook == dataset.recurring_hook() {
            let outcome = scheduler.run_recurring_scan().await?;
            report.recurring.push(RecurringRun { dataset, outcome });
            return Ok(());
        }

        let job_id = event
            .args
            .get("job_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = scheduler.get_status().await?;
        if job_id.is_empty() || status.job_id != job_id || !status.state.is_active() {
            debug!("Dropping stale '{}' trigger for job '{}'", event.hook, job_id);
            report.stale += 1;
            return Ok(());
        }

        report.batches.push(DueBatch {
            dataset,
            hook: event.hook.clone(),
            job_id,
            args: event.args.clone(),
            run_at: event.run_at,
        });
        Ok(())
    }

    /// Put a one-shot event taken by a failed cycle back on the substrate.
    async fn restore_event(&self, event: &ScheduledEvent) {
        match self.substrate.schedule_once(event.run_at, &event.hook, &event.args).await {
            Ok(_) => debug!("Restored '{}' for the next cycle", event.hook),
            Err(e) => error!("Could not restore '{}' after a failed tick: {}", event.hook, e),
        }
    }

    /// Register the cadence of every dataset.
    pub async fn reschedule_all(&self, context: &str) -> Result<Vec<(Dataset, RescheduleOutcome)>, SchedulerError> {
        let mut outcomes = Vec::new();
        for scheduler in self.iter() {
            outcomes.push((scheduler.dataset(), scheduler.reschedule_recurring_event(context).await?));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
#[path = "scheduler_set_tests.rs"]
mod tests;
