//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, MIN_RETRY_DELAY_SECS};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_scan(config, &mut result);
        Self::validate_orchestrator(config, &mut result);
        Self::validate_dispatch(config, &mut result);

        Ok(result)
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
    }

    fn validate_scan(config: &Config, result: &mut ValidationResult) {
        let scan = &config.scan;

        if scan.batch_size == 0 {
            result.add_error(ValidationError::new(
                "scan.batch_size",
                "batch_size must be greater than 0",
            ));
        }

        if scan.cadence.frequency_hours == 0 {
            result.add_error(ValidationError::new(
                "scan.cadence.frequency_hours",
                "frequency_hours must be greater than 0",
            ));
        }

        if let Err(e) = scan.cadence.parsed_time_of_day() {
            result.add_error(ValidationError::new("scan.cadence.time_of_day", e.to_string()));
        }

        if scan.utc_offset_minutes.abs() > 14 * 60 {
            result.add_error(ValidationError::new(
                "scan.utc_offset_minutes",
                "utc_offset_minutes must be within +/-840",
            ));
        }

        match scan.rest_window.parsed_bounds() {
            Ok((start, end)) => {
                if scan.rest_window.enabled && start == end {
                    result.add_warning(ValidationWarning::new(
                        "scan.rest_window",
                        "start equals end, the rest window is empty",
                    ));
                }
            }
            Err(e) => {
                result.add_error(ValidationError::new("scan.rest_window", e.to_string()));
            }
        }
    }

    fn validate_orchestrator(config: &Config, result: &mut ValidationResult) {
        let orchestrator = &config.orchestrator;

        if orchestrator.history_capacity == 0 {
            result.add_error(ValidationError::new(
                "orchestrator.history_capacity",
                "history_capacity must be greater than 0",
            ));
        }

        if orchestrator.retry_delay_secs < MIN_RETRY_DELAY_SECS {
            result.add_warning(ValidationWarning::new(
                "orchestrator.retry_delay_secs",
                format!(
                    "retry_delay_secs below {}s, {}s will be used",
                    MIN_RETRY_DELAY_SECS, MIN_RETRY_DELAY_SECS
                ),
            ));
        }

        if orchestrator.queue_capacity == 0 {
            result.add_warning(ValidationWarning::new(
                "orchestrator.queue_capacity",
                "queue_capacity is 0, the manual request queue is unbounded",
            ));
        }
    }

    fn validate_dispatch(config: &Config, result: &mut ValidationResult) {
        let dispatch = &config.dispatch;
        if !dispatch.enabled {
            return;
        }

        match dispatch.url.as_deref() {
            None | Some("") => {
                result.add_error(ValidationError::new(
                    "dispatch.url",
                    "url is required when dispatch is enabled",
                ));
            }
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                result.add_error(ValidationError::new(
                    "dispatch.url",
                    "url must start with http:// or https://",
                ));
            }
            Some(_) => {}
        }

        if dispatch.timeout_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "dispatch.timeout_ms",
                "timeout_ms is 0, dispatch requests will time out immediately",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
