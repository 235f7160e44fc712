//! Cron Trigger Adapter: best-effort ping that makes the batch executor poll now.

use std::time::Duration;

use async_trait::async_trait;
use linkaudit_config::DispatchConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SchedulerError;

/// Result of an immediate dispatch attempt. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub attempted: bool,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl DispatchReport {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn ok() -> Self {
        Self {
            attempted: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            attempted: true,
            failed: true,
            error: error.into(),
        }
    }
}

/// Shortens the latency between scheduling an event and running it.
///
/// Implementations never fail; every problem is returned in the report.
#[async_trait]
pub trait TriggerDispatcher: Send + Sync {
    async fn try_dispatch(&self) -> DispatchReport;
}

/// POSTs to the wake-up endpoint of the batch executor.
pub struct CronTriggerAdapter {
    enabled: bool,
    url: Option<String>,
    client: reqwest::Client,
}

impl CronTriggerAdapter {
    /// Build from config. `enabled` is the self-dispatch capability flag.
    pub fn new(config: &DispatchConfig) -> Result<Self, SchedulerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| SchedulerError::Dispatch(e.to_string()))?;
        Ok(Self {
            enabled: config.enabled,
            url: config.url.clone(),
            client,
        })
    }

    /// An adapter that never dispatches.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            url: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.url.is_some()
    }
}

#[async_trait]
impl TriggerDispatcher for CronTriggerAdapter {
    async fn try_dispatch(&self) -> DispatchReport {
        let url = match (&self.url, self.enabled) {
            (Some(url), true) => url,
            _ => {
                debug!("Immediate dispatch disabled");
                return DispatchReport::skipped();
            }
        };

        match self.client.post(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Immediate dispatch to {} accepted", url);
                DispatchReport::ok()
            }
            Ok(response) => {
                let status = response.status();
                warn!("Immediate dispatch to {} returned {}", url, status);
                DispatchReport::failure(format!("dispatch endpoint returned {}", status))
            }
            Err(e) => {
                warn!("Immediate dispatch to {} failed: {}", url, e);
                DispatchReport::failure(e.to_string())
            }
        }
    }
}
