//! Application state.

use std::sync::Arc;
use std::time::Instant;

use linkaudit_scheduler::{Dataset, JobScheduler, SchedulerSet};

use crate::error::ApiError;

/// State shared across handlers.
pub struct ApiState {
    pub schedulers: Arc<SchedulerSet>,
    start_time: Instant,
}

impl ApiState {
    pub fn new(schedulers: Arc<SchedulerSet>) -> Self {
        Self {
            schedulers,
            start_time: Instant::now(),
        }
    }

    /// Scheduler of the dataset named in a request path.
    pub fn scheduler(&self, name: &str) -> Result<Arc<JobScheduler>, ApiError> {
        let dataset: Dataset = name
            .parse()
            .map_err(|_| ApiError::UnknownDataset(name.to_string()))?;
        Ok(self.schedulers.get(dataset)?)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
