//! Automatic cadence: recurring trigger registration and the recurring run.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::SchedulerError;
use crate::scheduler::{JobScheduler, ScanOptions, ScanOutcome};

/// Result of [`JobScheduler::reschedule_recurring_event`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RescheduleOutcome {
    pub success: bool,
    pub message: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_run: Option<i64>,
    /// Set when registration failed: whether the previous schedule was put back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored: Option<bool>,
}

impl JobScheduler {
    /// Re-derive the cadence from current settings and re-register it.
    ///
    /// The substrate cannot replace a schedule atomically, so on failure the
    /// previous registration is restored and the outcome says whether that worked.
    pub async fn reschedule_recurring_event(&self, context: &str) -> Result<RescheduleOutcome, SchedulerError> {
        let hook = self.dataset.recurring_hook();
        let previous = self.substrate.scheduled_event(&hook, None).await?;
        let outcome = RescheduleOutcome {
            context: context.to_string(),
            previous_run: previous.as_ref().map(|e| e.run_at),
            ..Default::default()
        };

        let settings = match self.settings.resolve() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{} cadence left unchanged, settings unreadable: {}", self.dataset, e);
                return Ok(RescheduleOutcome {
                    message: format!("Settings could not be resolved: {}", e),
                    ..outcome
                });
            }
        };

        self.substrate.clear_scheduled(&hook, None).await?;
        let cadence = settings.cadence;
        if !cadence.enabled {
            info!("{} automatic scans disabled ({})", self.dataset, context);
            return Ok(RescheduleOutcome {
                success: true,
                message: "Automatic scans disabled".to_string(),
                ..outcome
            });
        }

        let next_run = cadence.next_run_after(Utc::now()).timestamp();
        let interval_secs = cadence.interval_secs();
        let registered = self
            .substrate
            .schedule_recurring(next_run, interval_secs, &hook, &json!(null))
            .await;

        let failure = match registered {
            Ok(true) => {
                info!(
                    "{} automatic scan every {}h, next at {} ({})",
                    self.dataset,
                    cadence.frequency_hours,
                    format_ts(next_run),
                    context
                );
                return Ok(RescheduleOutcome {
                    success: true,
                    message: format!("Next automatic scan at {}", format_ts(next_run)),
                    next_run: Some(next_run),
                    interval_secs: Some(interval_secs),
                    ..outcome
                });
            }
            Ok(false) => "scheduler refused the recurring event".to_string(),
            Err(e) => e.to_string(),
        };

        let restored = match &previous {
            Some(event) => {
                let interval = event.interval_secs.unwrap_or(interval_secs);
                matches!(
                    self.substrate
                        .schedule_recurring(event.run_at, interval, &hook, &event.args)
                        .await,
                    Ok(true)
                )
            }
            None => false,
        };
        error!(
            "{} cadence registration failed ({}), previous schedule restored: {}",
            self.dataset, failure, restored
        );

        Ok(RescheduleOutcome {
            message: format!("Could not register automatic scans: {}", failure),
            restored: Some(restored),
            ..outcome
        })
    }

    /// Automatic incremental scan fired by the recurring trigger.
    ///
    /// Never queues: an active job means this occurrence is skipped.
    pub async fn run_recurring_scan(&self) -> Result<ScanOutcome, SchedulerError> {
        let outcome = self
            .request_scan(false, false, false, ScanOptions::automatic("recurring"))
            .await?;

        if outcome.requires_confirmation {
            info!("{} recurring scan skipped, a job is already active", self.dataset);
        } else if outcome.deferred {
            info!("{} recurring scan skipped by the rest window", self.dataset);
        } else if !outcome.success {
            warn!("{} recurring scan did not start: {}", self.dataset, outcome.message);
        }
        Ok(outcome)
    }
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
#[path = "scheduler_recurring_tests.rs"]
mod tests;
