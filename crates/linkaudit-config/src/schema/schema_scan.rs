//! Scan cadence, rest window and batch settings.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::default_true;
use crate::error::ConfigError;

/// Scan settings read by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Items per batch handed to the executor.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Delay between consecutive batches, in seconds.
    #[serde(default = "default_batch_delay")]
    pub batch_delay_secs: u64,

    /// Offset applied to UTC when interpreting times of day.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default)]
    pub cadence: CadenceConfig,

    #[serde(default)]
    pub rest_window: RestWindowConfig,
}

fn default_batch_size() -> u32 {
    50
}

fn default_batch_delay() -> u64 {
    10
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_secs: default_batch_delay(),
            utc_offset_minutes: 0,
            cadence: CadenceConfig::default(),
            rest_window: RestWindowConfig::default(),
        }
    }
}

/// Automatic scan cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hours between automatic scans.
    #[serde(default = "default_frequency_hours")]
    pub frequency_hours: u32,

    /// Local time of day (`HH:MM`) of the first automatic scan.
    #[serde(default = "default_time_of_day")]
    pub time_of_day: String,
}

fn default_frequency_hours() -> u32 {
    24
}

fn default_time_of_day() -> String {
    "03:00".to_string()
}

impl CadenceConfig {
    /// Parsed `time_of_day`.
    pub fn parsed_time_of_day(&self) -> Result<NaiveTime, ConfigError> {
        parse_time_of_day("scan.cadence.time_of_day", &self.time_of_day)
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            frequency_hours: default_frequency_hours(),
            time_of_day: default_time_of_day(),
        }
    }
}

/// Quiet hours during which automatic scans must not start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestWindowConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_rest_start")]
    pub start: String,

    #[serde(default = "default_rest_end")]
    pub end: String,
}

fn default_rest_start() -> String {
    "22:00".to_string()
}

fn default_rest_end() -> String {
    "06:00".to_string()
}

impl RestWindowConfig {
    /// Parsed `(start, end)` bounds.
    pub fn parsed_bounds(&self) -> Result<(NaiveTime, NaiveTime), ConfigError> {
        Ok((
            parse_time_of_day("scan.rest_window.start", &self.start)?,
            parse_time_of_day("scan.rest_window.end", &self.end)?,
        ))
    }
}

impl Default for RestWindowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_rest_start(),
            end: default_rest_end(),
        }
    }
}

/// Parse an `HH:MM` (or `HH:MM:SS`) time of day.
pub fn parse_time_of_day(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected HH:MM, got '{}'", value),
        })
}
