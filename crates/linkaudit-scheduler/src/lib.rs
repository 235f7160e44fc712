//! # linkaudit scheduler
//!
//! Background-job orchestration for link and image audits.
//!
//! ## Features
//!
//! - Single-flight scans per dataset with a two-phase busy guard
//! - Persisted manual request queue drained on job completion
//! - Bounded scheduling retry with durable failure reporting
//! - Capacity-bounded job history with aggregate insights
//! - SQLite-backed stores safe to share between processes

pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod option_store;
pub mod queue;
pub mod scheduler;
pub mod scheduler_executor;
pub mod scheduler_recurring;
pub mod scheduler_set;
pub mod settings;
pub mod status;
pub mod substrate;

#[cfg(test)]
mod test_support;

pub use dataset::Dataset;
pub use dispatch::{CronTriggerAdapter, DispatchReport, TriggerDispatcher};
pub use error::SchedulerError;
pub use history::{HistoryEntry, HistoryInsights, HistoryLedger, JobMetrics, TriggerDiagnostics};
pub use option_store::{MemoryOptionStore, OptionStore, SqliteOptionStore};
pub use queue::{ManualQueueEntry, ManualRequestQueue};
pub use scheduler::{
    CancelOutcome, ClearedCounts, JobScheduler, ResetOutcome, ScanOptions, ScanOutcome, ScanTrigger,
    SchedulerOptions,
};
pub use scheduler_executor::{JobOutcome, NextBatch, QueueDrain, TerminalOutcome};
pub use scheduler_recurring::RescheduleOutcome;
pub use scheduler_set::{DueBatch, RecurringRun, SchedulerSet, TickFailure, TickReport};
pub use settings::{
    CadenceSettings, ConfigFileSettings, FixedIdentity, IdentityProvider, RestWindow, ScanSettings, SettingsReader,
    StaticSettings, SystemIdentity,
};
pub use status::{ScanState, ScanStatus, StatusPatch, StatusStore};
pub use substrate::{MemoryScheduler, ScheduledEvent, SchedulingPrimitive, SqliteScheduler};
