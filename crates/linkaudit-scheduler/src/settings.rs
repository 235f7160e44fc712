//! Read-only collaborators: resolved scan settings and the acting identity.

use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use linkaudit_config::{ConfigLoader, ScanConfig};
use serde::Serialize;
use tracing::warn;

use crate::error::SchedulerError;

/// Automatic scan cadence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CadenceSettings {
    pub enabled: bool,
    pub frequency_hours: u32,
    pub time_of_day: NaiveTime,
    pub utc_offset_minutes: i32,
}

impl CadenceSettings {
    pub fn interval_secs(&self) -> i64 {
        i64::from(self.frequency_hours.max(1)) * 3600
    }

    /// Next local `time_of_day` strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tz = local_offset(self.utc_offset_minutes);
        let local = now.with_timezone(&tz);
        let mut candidate = local.date_naive().and_time(self.time_of_day);
        if candidate <= local.naive_local() {
            candidate += Duration::days(1);
        }
        tz.from_local_datetime(&candidate)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now + Duration::days(1))
    }
}

/// Quiet hours during which automatic scans must not start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestWindow {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub utc_offset_minutes: i32,
}

impl RestWindow {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            utc_offset_minutes: 0,
        }
    }

    /// Whether `now` falls inside the window. Windows may wrap midnight;
    /// identical bounds make an empty window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.start == self.end {
            return false;
        }
        let t = now.with_timezone(&local_offset(self.utc_offset_minutes)).time();
        if self.start < self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Fully resolved scan settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSettings {
    pub cadence: CadenceSettings,
    pub rest_window: RestWindow,
    pub batch_size: u32,
    pub batch_delay_secs: u64,
}

impl ScanSettings {
    pub fn from_config(scan: &ScanConfig) -> Result<Self, SchedulerError> {
        let (start, end) = scan.rest_window.parsed_bounds()?;
        Ok(Self {
            cadence: CadenceSettings {
                enabled: scan.cadence.enabled,
                frequency_hours: scan.cadence.frequency_hours,
                time_of_day: scan.cadence.parsed_time_of_day()?,
                utc_offset_minutes: scan.utc_offset_minutes,
            },
            rest_window: RestWindow {
                enabled: scan.rest_window.enabled,
                start,
                end,
                utc_offset_minutes: scan.utc_offset_minutes,
            },
            batch_size: scan.batch_size,
            batch_delay_secs: scan.batch_delay_secs,
        })
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default()).unwrap_or_else(|_| Self {
            cadence: CadenceSettings {
                enabled: true,
                frequency_hours: 24,
                time_of_day: NaiveTime::MIN,
                utc_offset_minutes: 0,
            },
            rest_window: RestWindow::disabled(),
            batch_size: 50,
            batch_delay_secs: 10,
        })
    }
}

/// Source of resolved settings. The scheduler never writes settings.
pub trait SettingsReader: Send + Sync {
    fn resolve(&self) -> Result<ScanSettings, SchedulerError>;
}

/// Settings fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub ScanSettings);

impl StaticSettings {
    pub fn from_config(scan: &ScanConfig) -> Result<Self, SchedulerError> {
        Ok(Self(ScanSettings::from_config(scan)?))
    }
}

impl SettingsReader for StaticSettings {
    fn resolve(&self) -> Result<ScanSettings, SchedulerError> {
        Ok(self.0.clone())
    }
}

/// Settings re-read from the config file on every resolve, so edits are
/// picked up by the next reschedule without a restart.
pub struct ConfigFileSettings {
    path: PathBuf,
    fallback: ScanSettings,
}

impl ConfigFileSettings {
    pub fn new(path: impl Into<PathBuf>, fallback: ScanSettings) -> Self {
        Self {
            path: path.into(),
            fallback,
        }
    }
}

impl SettingsReader for ConfigFileSettings {
    fn resolve(&self) -> Result<ScanSettings, SchedulerError> {
        match ConfigLoader::load(&self.path) {
            Ok(config) => ScanSettings::from_config(&config.scan),
            Err(e) => {
                warn!("Using last known scan settings, {} unreadable: {}", self.path.display(), e);
                Ok(self.fallback.clone())
            }
        }
    }
}

/// Current actor for audit attribution.
pub trait IdentityProvider: Send + Sync {
    fn current_actor(&self) -> u64;
}

/// Background work with no human actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn current_actor(&self) -> u64 {
        0
    }
}

/// A known actor, e.g. from `--actor`.
#[derive(Debug, Clone, Copy)]
pub struct FixedIdentity(pub u64);

impl IdentityProvider for FixedIdentity {
    fn current_actor(&self) -> u64 {
        self.0
    }
}

fn local_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
        warn!("UTC offset {} minutes out of range, using UTC", minutes);
        Utc.fix()
    })
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
