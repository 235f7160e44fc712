//! Job scheduler: decides whether a scan starts, queues, is replaced or is
//! refused, and schedules the first batch with a bounded retry.
//!
//! Every call starts from the stored status; the scheduler keeps no
//! in-memory notion of what is running, so any number of processes may
//! share the same stores.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use linkaudit_config::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::dispatch::{CronTriggerAdapter, DispatchReport, TriggerDispatcher};
use crate::error::SchedulerError;
use crate::history::{
    HistoryEntry, HistoryInsights, HistoryLedger, JobMetrics, TriggerDiagnostics, DEFAULT_HISTORY_CAPACITY,
};
use crate::option_store::OptionStore;
use crate::queue::{ManualQueueEntry, ManualRequestQueue};
use crate::settings::{IdentityProvider, SettingsReader, StaticSettings, SystemIdentity};
use crate::status::{ScanState, ScanStatus, StatusStore};
use crate::substrate::SchedulingPrimitive;

/// Scheduling attempts per logical job.
pub const MAX_SCHEDULE_ATTEMPTS: u32 = 2;

/// Resolution hint returned when quiet hours defer an automatic scan.
pub const REST_WINDOW_HINT: &str = "rest_window";

/// `queued_via` label of jobs started from the manual queue.
pub const QUEUED_VIA_MANUAL_QUEUE: &str = "manual_queue";

/// Tunables of the orchestrator.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub retry_delay: Duration,
    pub history_capacity: usize,
    /// 0 = unlimited.
    pub queue_capacity: usize,
}

impl SchedulerOptions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            retry_delay: Duration::from_secs(config.effective_retry_delay_secs()),
            history_capacity: config.history_capacity,
            queue_capacity: config.queue_capacity,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// What caused a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTrigger {
    #[default]
    Manual,
    Automatic,
}

/// Extra context of a scan request.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub trigger: ScanTrigger,
    /// Start an automatic scan even inside the rest window.
    pub bypass_rest_window: bool,
    /// The request was popped from the manual queue.
    pub from_queue: bool,
    /// Surface that produced the request.
    pub context: String,
    /// Requester; the identity provider is asked when `None`.
    pub requested_by: Option<u64>,
    pub queued_via: Option<String>,
}

impl ScanOptions {
    pub fn manual(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    pub fn automatic(context: impl Into<String>) -> Self {
        Self {
            trigger: ScanTrigger::Automatic,
            context: context.into(),
            ..Default::default()
        }
    }

    pub(crate) fn from_queue_entry(entry: &ManualQueueEntry) -> Self {
        Self {
            from_queue: true,
            context: entry.context.clone(),
            requested_by: Some(entry.requested_by),
            queued_via: Some(QUEUED_VIA_MANUAL_QUEUE.to_string()),
            ..Default::default()
        }
    }
}

/// Structured result of [`JobScheduler::request_scan`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub queued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<usize>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<ScanState>,
    #[serde(default)]
    pub queue_available: bool,
    #[serde(default)]
    pub queue_full: bool,
    #[serde(default)]
    pub deferred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_hint: Option<String>,
    /// Queue entries dropped by a forced replacement.
    #[serde(default)]
    pub cleared_queue: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchReport>,
    /// Advisory problem that did not prevent success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ScanOutcome {
    fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

fn scan_kind(is_full_scan: bool) -> &'static str {
    if is_full_scan {
        "full"
    } else {
        "incremental"
    }
}

/// Triggers removed by a cancellation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearedCounts {
    pub first_batch: usize,
    pub next_batch: usize,
}

impl ClearedCounts {
    pub fn total(&self) -> usize {
        self.first_batch + self.next_batch
    }
}

/// Result of [`JobScheduler::cancel_scan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub message: String,
    pub cleared_counts: ClearedCounts,
    /// Whether a job was in flight when the call arrived.
    pub was_active: bool,
}

/// Result of [`JobScheduler::reset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub cleared_counts: ClearedCounts,
    pub cleared_queue: usize,
}

/// Orchestrator of one dataset's scans.
pub struct JobScheduler {
    pub(crate) dataset: Dataset,
    pub(crate) status: StatusStore,
    pub(crate) history: HistoryLedger,
    pub(crate) queue: ManualRequestQueue,
    pub(crate) substrate: Arc<dyn SchedulingPrimitive>,
    pub(crate) dispatcher: Arc<dyn TriggerDispatcher>,
    pub(crate) settings: Arc<dyn SettingsReader>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    retry_delay: Duration,
}

impl JobScheduler {
    /// Create a scheduler with dispatch disabled, default settings and the
    /// system identity.
    pub fn new(
        dataset: Dataset,
        store: Arc<dyn OptionStore>,
        substrate: Arc<dyn SchedulingPrimitive>,
        options: SchedulerOptions,
    ) -> Self {
        let history_capacity = if options.history_capacity == 0 {
            DEFAULT_HISTORY_CAPACITY
        } else {
            options.history_capacity
        };
        Self {
            dataset,
            status: StatusStore::new(store.clone(), dataset),
            history: HistoryLedger::new(store.clone(), dataset, history_capacity),
            queue: ManualRequestQueue::new(store, dataset, options.queue_capacity),
            substrate,
            dispatcher: Arc::new(CronTriggerAdapter::disabled()),
            settings: Arc::new(StaticSettings::default()),
            identity: Arc::new(SystemIdentity),
            retry_delay: options.retry_delay,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TriggerDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsReader>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn queue(&self) -> &ManualRequestQueue {
        &self.queue
    }

    pub(crate) fn job_args(job_id: &str) -> Value {
        json!({ "job_id": job_id })
    }

    /// Start, queue, replace or refuse a scan.
    pub async fn request_scan(
        &self,
        is_full_scan: bool,
        force_cancel: bool,
        queue_on_busy: bool,
        options: ScanOptions,
    ) -> Result<ScanOutcome, SchedulerError> {
        let current = self.status.get().await?;
        let requested_by = options
            .requested_by
            .unwrap_or_else(|| self.identity.current_actor());

        if options.trigger == ScanTrigger::Automatic && !options.bypass_rest_window {
            let settings = self.settings.resolve()?;
            if settings.rest_window.contains(Utc::now()) {
                info!("{} scan deferred by rest window", self.dataset);
                return Ok(ScanOutcome {
                    deferred: true,
                    resolution_hint: Some(REST_WINDOW_HINT.to_string()),
                    current_state: Some(current.state),
                    ..ScanOutcome::refused("Automatic scans are paused during the rest window")
                });
            }
        }

        let mut cleared_queue = 0;
        if current.is_active() {
            if !force_cancel {
                return self.handle_busy(&current, is_full_scan, queue_on_busy, requested_by, &options).await;
            }

            cleared_queue = match self.queue.clear().await {
                Ok(count) => count,
                Err(e) => {
                    warn!("Could not clear {} manual queue before replacement: {}", self.dataset, e);
                    0
                }
            };
            self.replace_active(&current, requested_by).await?;
        }

        if options.from_queue {
            info!("Starting queued {} request from '{}'", self.dataset, options.context);
        }

        let job_id = Uuid::new_v4().to_string();
        let Some(claimed) = self.claim(&job_id, is_full_scan, requested_by).await? else {
            let current = self.status.get().await?;
            info!(
                "{} job '{}' took the slot before job '{}' could claim it",
                self.dataset, current.job_id, job_id
            );
            return self.handle_busy(&current, is_full_scan, queue_on_busy, requested_by, &options).await;
        };

        let mut outcome = self.start(claimed, &options).await?;
        outcome.cleared_queue = cleared_queue;
        Ok(outcome)
    }

    async fn handle_busy(
        &self,
        current: &ScanStatus,
        is_full_scan: bool,
        queue_on_busy: bool,
        requested_by: u64,
        options: &ScanOptions,
    ) -> Result<ScanOutcome, SchedulerError> {
        if !queue_on_busy {
            return Ok(ScanOutcome {
                requires_confirmation: true,
                current_state: Some(current.state),
                queue_available: true,
                job_id: (!current.job_id.is_empty()).then(|| current.job_id.clone()),
                ..ScanOutcome::refused(format!(
                    "A {} scan is already {}; cancel it or queue this request",
                    self.dataset, current.state
                ))
            });
        }

        let entry = ManualQueueEntry::new(is_full_scan, requested_by, options.context.clone());
        match self.queue.enqueue(entry).await {
            Ok(queue_length) => Ok(ScanOutcome {
                success: true,
                queued: true,
                queue_length: Some(queue_length),
                current_state: Some(current.state),
                message: format!(
                    "{} scan queued at position {} behind the active job",
                    self.dataset, queue_length
                ),
                ..Default::default()
            }),
            Err(SchedulerError::QueueFull { capacity }) => Ok(ScanOutcome {
                queue_full: true,
                queue_length: Some(capacity),
                current_state: Some(current.state),
                ..ScanOutcome::refused(format!("Manual queue is full ({} waiting)", capacity))
            }),
            Err(e) => Err(e),
        }
    }

    /// Cancel the in-flight job ahead of a forced replacement.
    async fn replace_active(&self, current: &ScanStatus, requested_by: u64) -> Result<(), SchedulerError> {
        let cleared = self.clear_batch_triggers().await?;
        let replaced_job = current.job_id.clone();
        let now = Utc::now().timestamp();
        let status = self
            .status
            .update_with(move |s| {
                s.state = ScanState::Cancelled;
                s.remaining_batches = 0;
                s.ended_at = now;
                s.message = "Replaced by a new scan request".to_string();
            })
            .await?;

        let entry = HistoryEntry::from_status(self.dataset, &status).with_metrics(JobMetrics::from_status(&status, now));
        self.history.append(HistoryEntry { actor: requested_by, ..entry }).await?;
        warn!(
            "{} job '{}' replaced by force ({} trigger(s) cleared)",
            self.dataset,
            replaced_job,
            cleared.total()
        );
        Ok(())
    }

    /// Take the single active slot for `job_id`; `None` when another job holds it.
    ///
    /// The claimed record is `queued` with `attempt = 1` before the substrate is
    /// asked for anything, so concurrent requests see the slot as busy.
    async fn claim(
        &self,
        job_id: &str,
        is_full_scan: bool,
        requested_by: u64,
    ) -> Result<Option<ScanStatus>, SchedulerError> {
        let job_id = job_id.to_string();
        let message = format!("{} {} scan scheduling", self.dataset, scan_kind(is_full_scan));
        self.status
            .update_if(move |s| {
                if s.is_active() {
                    return false;
                }
                *s = ScanStatus {
                    state: ScanState::Queued,
                    job_id,
                    attempt: 1,
                    is_full_scan,
                    requested_by,
                    message,
                    ..Default::default()
                };
                true
            })
            .await
    }

    /// Record a new attempt on the claimed job; `false` if it was cancelled or replaced meanwhile.
    async fn bump_attempt(&self, job_id: &str, attempt: u32) -> Result<bool, SchedulerError> {
        let job_id = job_id.to_string();
        let bumped = self
            .status
            .update_if(move |s| {
                if s.job_id != job_id || s.state != ScanState::Queued {
                    return false;
                }
                s.attempt = attempt;
                true
            })
            .await?;
        Ok(bumped.is_some())
    }

    fn superseded(&self, job_id: String) -> ScanOutcome {
        warn!("{} job '{}' was cancelled or replaced while scheduling", self.dataset, job_id);
        ScanOutcome {
            job_id: Some(job_id),
            ..ScanOutcome::refused(format!(
                "The {} scan was cancelled or replaced before it could be scheduled",
                self.dataset
            ))
        }
    }

    /// Schedule the first batch of a claimed job, retrying once.
    async fn start(&self, claimed: ScanStatus, options: &ScanOptions) -> Result<ScanOutcome, SchedulerError> {
        let job_id = claimed.job_id.clone();
        let hook = self.dataset.first_batch_hook();
        let args = Self::job_args(&job_id);

        match self.substrate.clear_scheduled(&hook, None).await {
            Ok(0) => {}
            Ok(stale) => info!("Cleared {} stale first-batch trigger(s) for {}", stale, self.dataset),
            Err(e) => warn!("Could not clear stale first-batch triggers for {}: {}", self.dataset, e),
        }

        let mut attempt = claimed.attempt;
        let mut last_error = String::new();
        let mut scheduled_at = None;
        loop {
            let run_at = Utc::now().timestamp();
            match self.substrate.schedule_once(run_at, &hook, &args).await {
                Ok(true) => {
                    scheduled_at = Some(run_at);
                    break;
                }
                Ok(false) => last_error = format!("scheduler refused '{}' on attempt {}", hook, attempt),
                Err(e) => last_error = format!("scheduling '{}' failed on attempt {}: {}", hook, attempt, e),
            }
            warn!("{} job '{}': {}", self.dataset, job_id, last_error);

            if attempt >= MAX_SCHEDULE_ATTEMPTS {
                break;
            }
            warn!(
                "Retrying {} job '{}' scheduling in {:?} (attempt {})",
                self.dataset,
                job_id,
                self.retry_delay,
                attempt + 1
            );
            tokio::time::sleep(self.retry_delay).await;
            attempt += 1;
            if !self.bump_attempt(&job_id, attempt).await? {
                return Ok(self.superseded(job_id));
            }
        }

        let diagnostics = TriggerDiagnostics {
            bypass_rest_window: options.bypass_rest_window,
            queued_via: options.queued_via.clone(),
            ..Default::default()
        };

        let Some(scheduled_at) = scheduled_at else {
            return self.fail_start(job_id, attempt, last_error, diagnostics).await;
        };

        let message = format!("{} {} scan queued", self.dataset, scan_kind(claimed.is_full_scan));
        let confirmed = {
            let job_id = job_id.clone();
            let message = message.clone();
            self.status
                .update_if(move |s| {
                    // The executor may already have moved the job to running.
                    if s.job_id != job_id || !s.is_active() {
                        return false;
                    }
                    s.scheduled_at = scheduled_at;
                    if s.state == ScanState::Queued {
                        s.message = message;
                    }
                    true
                })
                .await?
        };
        let Some(status) = confirmed else {
            if let Err(e) = self.substrate.clear_scheduled(&hook, Some(&args)).await {
                warn!("Could not clear trigger of superseded {} job '{}': {}", self.dataset, job_id, e);
            }
            return Ok(self.superseded(job_id));
        };
        info!("{} job '{}' queued (attempt {})", self.dataset, job_id, attempt);

        let dispatch = self.dispatcher.try_dispatch().await;
        let diagnostics = TriggerDiagnostics {
            manual_trigger_failed: dispatch.failed,
            manual_trigger_error: dispatch.error.clone(),
            ..diagnostics
        };
        let entry = HistoryEntry::from_status(self.dataset, &status).with_diagnostics(diagnostics);
        self.history
            .append(HistoryEntry {
                state: ScanState::Queued,
                message: message.clone(),
                ..entry
            })
            .await?;

        let warning = dispatch.failed.then(|| {
            format!(
                "Scan queued, but immediate dispatch failed ({}); it will start on the next polling cycle",
                dispatch.error
            )
        });
        Ok(ScanOutcome {
            success: true,
            message,
            job_id: Some(job_id),
            current_state: Some(ScanState::Queued),
            dispatch: Some(dispatch),
            warning,
            ..Default::default()
        })
    }

    /// Move the claimed job to `failed` after the last attempt.
    async fn fail_start(
        &self,
        job_id: String,
        attempt: u32,
        last_error: String,
        diagnostics: TriggerDiagnostics,
    ) -> Result<ScanOutcome, SchedulerError> {
        let now = Utc::now().timestamp();
        let message = format!("Could not schedule {} scan after {} attempts", self.dataset, attempt);
        let failed = {
            let job_id = job_id.clone();
            let message = message.clone();
            let last_error = last_error.clone();
            self.status
                .update_if(move |s| {
                    if s.job_id != job_id || s.state != ScanState::Queued {
                        return false;
                    }
                    s.state = ScanState::Failed;
                    s.attempt = attempt;
                    s.ended_at = now;
                    s.message = message;
                    s.last_error = last_error;
                    true
                })
                .await?
        };
        let Some(status) = failed else {
            return Ok(self.superseded(job_id));
        };
        self.history
            .append(HistoryEntry::from_status(self.dataset, &status).with_diagnostics(diagnostics))
            .await?;
        error!("{} job '{}' failed to schedule: {}", self.dataset, job_id, last_error);

        Ok(ScanOutcome {
            job_id: Some(job_id),
            current_state: Some(ScanState::Failed),
            ..ScanOutcome::refused(format!("{}: {}", message, last_error))
        })
    }

    /// Remove pending batch triggers of every job of this dataset.
    pub(crate) async fn clear_batch_triggers(&self) -> Result<ClearedCounts, SchedulerError> {
        Ok(ClearedCounts {
            first_batch: self
                .substrate
                .clear_scheduled(&self.dataset.first_batch_hook(), None)
                .await?,
            next_batch: self
                .substrate
                .clear_scheduled(&self.dataset.next_batch_hook(), None)
                .await?,
        })
    }

    /// Cooperatively cancel the current job. Safe to repeat.
    pub async fn cancel_scan(&self) -> Result<CancelOutcome, SchedulerError> {
        let cleared_counts = self.clear_batch_triggers().await?;
        let before = self.status.get().await?;
        let was_active = before.is_active();
        let now = Utc::now().timestamp();

        let status = self
            .status
            .update_with(move |s| {
                if s.state != ScanState::Cancelled || s.ended_at == 0 {
                    s.ended_at = now;
                }
                s.state = ScanState::Cancelled;
                s.remaining_batches = 0;
                s.total_items = 0;
                s.processed_items = 0;
                s.next_batch_timestamp = 0;
                s.message = "Scan cancelled".to_string();
            })
            .await?;

        if was_active {
            let metrics = JobMetrics::from_status(&before, now);
            let entry = HistoryEntry::from_status(self.dataset, &status).with_metrics(metrics);
            self.history
                .append(HistoryEntry {
                    actor: self.identity.current_actor(),
                    ..entry
                })
                .await?;
            info!(
                "{} job '{}' cancelled ({} trigger(s) cleared)",
                self.dataset,
                status.job_id,
                cleared_counts.total()
            );
        }

        Ok(CancelOutcome {
            success: true,
            message: if was_active {
                format!("{} scan cancelled", self.dataset)
            } else {
                format!("No active {} scan; status marked cancelled", self.dataset)
            },
            cleared_counts,
            was_active,
        })
    }

    /// Read-only status projection.
    pub async fn get_status(&self) -> Result<ScanStatus, SchedulerError> {
        self.status.get().await
    }

    pub async fn get_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, SchedulerError> {
        self.history.list(limit).await
    }

    pub async fn get_insights(&self) -> Result<HistoryInsights, SchedulerError> {
        self.history.summarize().await
    }

    /// Administrative reset: fresh idle status, no triggers, empty queue.
    pub async fn reset(&self, actor: Option<u64>) -> Result<ResetOutcome, SchedulerError> {
        let actor = actor.unwrap_or_else(|| self.identity.current_actor());
        let cleared_counts = self.clear_batch_triggers().await?;
        self.status.replace(ScanStatus::default()).await?;
        let cleared_queue = self.queue.clear().await?;
        self.history.append(HistoryEntry::reset(self.dataset, actor)).await?;
        warn!("{} scan state reset by actor {}", self.dataset, actor);

        Ok(ResetOutcome {
            success: true,
            cleared_counts,
            cleared_queue,
        })
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
