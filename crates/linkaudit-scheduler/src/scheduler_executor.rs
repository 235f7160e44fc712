//! Callback surface used by the external batch executor.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::history::{HistoryEntry, JobMetrics};
use crate::scheduler::{JobScheduler, ScanOptions, ScanOutcome};
use crate::status::{ScanState, ScanStatus};

/// How a job ended, as reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn state(&self) -> ScanState {
        match self {
            JobOutcome::Completed => ScanState::Completed,
            JobOutcome::Failed => ScanState::Failed,
            JobOutcome::Cancelled => ScanState::Cancelled,
        }
    }
}

/// Answer to [`JobScheduler::schedule_next_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextBatch {
    /// Next batch trigger registered.
    Scheduled { run_at: i64 },
    /// A trigger for this job was already pending.
    AlreadyPending { run_at: Option<i64> },
    /// The job is no longer authoritative; the executor must stop.
    Stop { reason: String },
}

/// What happened after a queued entry was popped on job completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QueueDrain {
    /// Nothing was waiting.
    Empty,
    /// A popped request started. Requests popped before it that failed to
    /// schedule are listed in `failed`.
    Started {
        outcome: ScanOutcome,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed: Vec<ScanOutcome>,
    },
    /// Every waiting request was popped and none could be scheduled.
    Exhausted { failed: Vec<ScanOutcome> },
    /// Another job became active first; the entry went back to the front.
    Restored { queue_length: usize },
}

/// Result of [`JobScheduler::on_job_terminal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalOutcome {
    /// False when the job id was stale or the job already ended.
    pub applied: bool,
    pub status: ScanStatus,
    pub drain: QueueDrain,
}

impl JobScheduler {
    /// The executor picked up the first batch.
    pub async fn on_job_started(
        &self,
        job_id: &str,
        total_batches: u64,
        total_items: u64,
    ) -> Result<bool, SchedulerError> {
        let now = Utc::now().timestamp();
        let owned = job_id.to_string();
        let started = self
            .status
            .update_if(move |s| {
                if s.job_id != owned || s.state != ScanState::Queued {
                    return false;
                }
                s.state = ScanState::Running;
                s.started_at = now;
                s.total_batches = total_batches;
                s.remaining_batches = total_batches;
                s.total_items = total_items;
                s.message = "Scan running".to_string();
                true
            })
            .await?;

        match started {
            Some(status) => {
                self.history
                    .append(HistoryEntry::from_status(self.dataset, &status))
                    .await?;
                info!(
                    "{} job '{}' running ({} batches, {} items)",
                    self.dataset, job_id, total_batches, total_items
                );
                Ok(true)
            }
            None => {
                debug!("Ignoring start of non-queued {} job '{}'", self.dataset, job_id);
                Ok(false)
            }
        }
    }

    /// Record one finished batch. Returns `false` for stale or inactive jobs.
    pub async fn on_batch_progress(
        &self,
        job_id: &str,
        processed_delta: u64,
        total_hint: Option<u64>,
    ) -> Result<bool, SchedulerError> {
        let now = Utc::now().timestamp();
        let owned = job_id.to_string();
        let updated = self
            .status
            .update_if(move |s| {
                if s.job_id != owned || !s.state.is_active() {
                    return false;
                }
                if s.state == ScanState::Queued {
                    s.state = ScanState::Running;
                    s.started_at = now;
                }
                s.processed_items += processed_delta;
                s.processed_batches += 1;
                s.current_batch = s.processed_batches;
                if let Some(total) = total_hint {
                    s.total_items = s.total_items.max(total);
                }
                s.total_batches = s.total_batches.max(s.processed_batches);
                s.remaining_batches = s.total_batches - s.processed_batches;
                s.message = format!("Processed batch {}", s.processed_batches);
                true
            })
            .await?;

        if updated.is_none() {
            debug!("Ignoring progress for stale {} job '{}'", self.dataset, job_id);
        }
        Ok(updated.is_some())
    }

    /// Register the continuation of a job, unless it was cancelled or replaced.
    pub async fn schedule_next_batch(
        &self,
        job_id: &str,
        delay_secs: Option<u64>,
    ) -> Result<NextBatch, SchedulerError> {
        let status = self.status.get().await?;
        if status.job_id != job_id || !status.state.is_active() {
            info!(
                "{} job '{}' is no longer active ({}), stopping",
                self.dataset, job_id, status.state
            );
            let reason = if status.job_id == job_id {
                format!("job is {}", status.state)
            } else {
                "job was superseded".to_string()
            };
            return Ok(NextBatch::Stop { reason });
        }

        let delay = match delay_secs {
            Some(delay) => delay,
            None => self.settings.resolve()?.batch_delay_secs,
        };
        let run_at = Utc::now().timestamp() + i64::try_from(delay).unwrap_or(i64::MAX / 2);
        let hook = self.dataset.next_batch_hook();
        let args = Self::job_args(job_id);

        if !self.substrate.schedule_once(run_at, &hook, &args).await? {
            let pending = self.substrate.next_scheduled(&hook, Some(&args)).await?;
            return Ok(NextBatch::AlreadyPending { run_at: pending });
        }

        let owned = job_id.to_string();
        let still_active = self
            .status
            .update_if(move |s| {
                if s.job_id != owned || !s.state.is_active() {
                    return false;
                }
                s.next_batch_timestamp = run_at;
                true
            })
            .await?;

        if still_active.is_none() {
            // Cancelled between the read and the schedule call
            self.substrate.clear_scheduled(&hook, Some(&args)).await?;
            return Ok(NextBatch::Stop {
                reason: "job cancelled while scheduling".to_string(),
            });
        }
        debug!("{} job '{}' next batch at {}", self.dataset, job_id, run_at);
        Ok(NextBatch::Scheduled { run_at })
    }

    /// Terminal transition reported by the executor, followed by a queue drain.
    pub async fn on_job_terminal(
        &self,
        job_id: &str,
        outcome: JobOutcome,
        metrics: Option<JobMetrics>,
        message: Option<String>,
    ) -> Result<TerminalOutcome, SchedulerError> {
        let now = Utc::now().timestamp();
        let owned = job_id.to_string();
        let state = outcome.state();
        let terminal_message = message.unwrap_or_else(|| format!("Scan {}", state));
        let last_error = (outcome == JobOutcome::Failed).then(|| terminal_message.clone());

        let ended = self
            .status
            .update_if(move |s| {
                if s.job_id != owned || !s.state.is_active() {
                    return false;
                }
                s.state = state;
                s.ended_at = now;
                s.remaining_batches = 0;
                s.next_batch_timestamp = 0;
                s.message = terminal_message;
                if let Some(error) = last_error {
                    s.last_error = error;
                }
                true
            })
            .await?;

        let applied = ended.is_some();
        if let Some(status) = &ended {
            let metrics = metrics.unwrap_or_else(|| JobMetrics::from_status(status, now));
            self.history
                .append(HistoryEntry::from_status(self.dataset, status).with_metrics(metrics))
                .await?;
            info!("{} job '{}' {}", self.dataset, job_id, status.state);
        } else {
            debug!("Ignoring terminal report for stale {} job '{}'", self.dataset, job_id);
        }

        let status = match ended {
            Some(status) => status,
            None => self.status.get().await?,
        };
        let drain = if status.is_active() {
            QueueDrain::Empty
        } else {
            self.drain_queue().await?
        };

        Ok(TerminalOutcome { applied, status, drain })
    }

    /// Start the oldest queued request, restoring it if another job won the race.
    ///
    /// A request that fails to schedule is dropped and the next one is tried,
    /// until one starts or the queue is empty.
    pub async fn drain_queue(&self) -> Result<QueueDrain, SchedulerError> {
        let mut failed = Vec::new();

        while let Some(entry) = self.queue.pop_front().await? {
            let outcome = match self
                .request_scan(entry.is_full_scan, false, false, ScanOptions::from_queue_entry(&entry))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("{} queued request failed to start, restoring: {}", self.dataset, e);
                    self.queue.prepend(entry).await?;
                    return Err(e);
                }
            };

            if outcome.requires_confirmation {
                let queue_length = self.queue.prepend(entry).await?;
                info!(
                    "{} queue drain lost the race to an active job; request restored",
                    self.dataset
                );
                return Ok(QueueDrain::Restored { queue_length });
            }

            if outcome.success {
                info!(
                    "{} queued request from '{}' started: {}",
                    self.dataset, entry.context, outcome.message
                );
                return Ok(QueueDrain::Started { outcome, failed });
            }

            warn!(
                "{} queued request from '{}' could not be scheduled: {}",
                self.dataset, entry.context, outcome.message
            );
            failed.push(outcome);
        }

        if failed.is_empty() {
            Ok(QueueDrain::Empty)
        } else {
            Ok(QueueDrain::Exhausted { failed })
        }
    }
}

#[cfg(test)]
#[path = "scheduler_executor_tests.rs"]
mod tests;
