//! Cooperative scheduling substrate: one-shot and recurring hook events.
//!
//! The substrate only promises that a pending event will eventually be
//! returned by [`SchedulingPrimitive::take_due`]. It offers no locking and
//! no immediate execution; the job scheduler compensates for both.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::error::SchedulerError;

/// A pending hook invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: String,
    pub hook: String,
    pub args: Value,
    /// Unix seconds.
    pub run_at: i64,
    /// Set for recurring events.
    pub interval_secs: Option<i64>,
}

impl ScheduledEvent {
    fn new(hook: &str, args: &Value, run_at: i64, interval_secs: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            hook: hook.to_string(),
            args: args.clone(),
            run_at,
            interval_secs,
        }
    }

    fn matches(&self, hook: &str, args: Option<&Value>) -> bool {
        self.hook == hook && args.is_none_or(|a| *a == self.args)
    }

}

/// First run of a recurring schedule strictly after `now`. Missed runs are skipped.
fn advance_past(run_at: i64, interval_secs: i64, now: i64) -> i64 {
    let missed = (now - run_at).div_euclid(interval_secs) + 1;
    run_at + missed.max(1) * interval_secs
}

/// Scheduling primitive the job scheduler is written against.
#[async_trait]
pub trait SchedulingPrimitive: Send + Sync {
    /// Schedule a one-shot event. `Ok(false)` when an identical event is pending.
    async fn schedule_once(&self, run_at: i64, hook: &str, args: &Value) -> Result<bool, SchedulerError>;

    /// Schedule a recurring event. `Ok(false)` when an identical event is pending.
    async fn schedule_recurring(
        &self,
        first_run: i64,
        interval_secs: i64,
        hook: &str,
        args: &Value,
    ) -> Result<bool, SchedulerError>;

    /// Remove pending events of a hook (every args when `None`). Returns the count.
    async fn clear_scheduled(&self, hook: &str, args: Option<&Value>) -> Result<usize, SchedulerError>;

    /// Earliest pending event of a hook.
    async fn scheduled_event(&self, hook: &str, args: Option<&Value>) -> Result<Option<ScheduledEvent>, SchedulerError>;

    /// Timestamp of the earliest pending event of a hook.
    async fn next_scheduled(&self, hook: &str, args: Option<&Value>) -> Result<Option<i64>, SchedulerError> {
        Ok(self.scheduled_event(hook, args).await?.map(|e| e.run_at))
    }

    /// Claim events due at `now`, earliest first. One-shot events are removed,
    /// recurring events move to their next run.
    async fn take_due(&self, now: i64) -> Result<Vec<ScheduledEvent>, SchedulerError>;
}

/// In-process substrate for tests and single-process use.
#[derive(Default)]
pub struct MemoryScheduler {
    events: RwLock<Vec<ScheduledEvent>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pending event, earliest first.
    pub async fn pending(&self) -> Vec<ScheduledEvent> {
        let mut events = self.events.read().await.clone();
        events.sort_by_key(|e| e.run_at);
        events
    }

    async fn insert(&self, event: ScheduledEvent) -> bool {
        let mut events = self.events.write().await;
        if events.iter().any(|e| e.matches(&event.hook, Some(&event.args))) {
            debug!("Refusing duplicate event for hook '{}'", event.hook);
            return false;
        }
        debug!("Scheduled '{}' at {}", event.hook, event.run_at);
        events.push(event);
        true
    }
}

#[async_trait]
impl SchedulingPrimitive for MemoryScheduler {
    async fn schedule_once(&self, run_at: i64, hook: &str, args: &Value) -> Result<bool, SchedulerError> {
        Ok(self.insert(ScheduledEvent::new(hook, args, run_at, None)).await)
    }

    async fn schedule_recurring(
        &self,
        first_run: i64,
        interval_secs: i64,
        hook: &str,
        args: &Value,
    ) -> Result<bool, SchedulerError> {
        if interval_secs <= 0 {
            return Err(SchedulerError::Scheduling(format!(
                "invalid interval {}s for '{}'",
                interval_secs, hook
            )));
        }
        Ok(self
            .insert(ScheduledEvent::new(hook, args, first_run, Some(interval_secs)))
            .await)
    }

    async fn clear_scheduled(&self, hook: &str, args: Option<&Value>) -> Result<usize, SchedulerError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| !e.matches(hook, args));
        Ok(before - events.len())
    }

    async fn scheduled_event(&self, hook: &str, args: Option<&Value>) -> Result<Option<ScheduledEvent>, SchedulerError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.matches(hook, args))
            .min_by_key(|e| e.run_at)
            .cloned())
    }

    async fn take_due(&self, now: i64) -> Result<Vec<ScheduledEvent>, SchedulerError> {
        let mut events = self.events.write().await;
        let mut due: Vec<ScheduledEvent> = events.iter().filter(|e| e.run_at <= now).cloned().collect();
        due.sort_by_key(|e| e.run_at);

        events.retain(|e| e.run_at > now || e.interval_secs.is_some());
        for event in events.iter_mut().filter(|e| e.run_at <= now) {
            if let Some(interval) = event.interval_secs.filter(|i| *i > 0) {
                event.run_at = advance_past(event.run_at, interval, now);
            }
        }
        Ok(due)
    }
}

const EVENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_events (
    id TEXT PRIMARY KEY,
    hook TEXT NOT NULL,
    args TEXT NOT NULL,
    run_at INTEGER NOT NULL,
    interval_secs INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scheduled_events_run_at ON scheduled_events(run_at);
CREATE INDEX IF NOT EXISTS idx_scheduled_events_hook ON scheduled_events(hook);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed substrate shared by every process opening the same file.
pub struct SqliteScheduler {
    conn: Connection,
}

impl SqliteScheduler {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::with_connection(conn).await
    }

    pub async fn in_memory() -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    pub async fn with_connection(conn: Connection) -> Result<Self, SchedulerError> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(EVENTS_SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn insert(&self, event: ScheduledEvent) -> Result<bool, SchedulerError> {
        let args = serde_json::to_string(&event.args)?;
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists: Option<String> = tx
                    .query_row(
                        "SELECT id FROM scheduled_events WHERE hook = ?1 AND args = ?2 LIMIT 1",
                        params![event.hook, args],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO scheduled_events (id, hook, args, run_at, interval_secs, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        event.id,
                        event.hook,
                        args,
                        event.run_at,
                        event.interval_secs,
                        Utc::now().to_rfc3339()
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(inserted)
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, i64, Option<i64>)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn decode(raw: (String, String, String, i64, Option<i64>)) -> Result<ScheduledEvent, SchedulerError> {
        let (id, hook, args, run_at, interval_secs) = raw;
        Ok(ScheduledEvent {
            id,
            hook,
            args: serde_json::from_str(&args)?,
            run_at,
            interval_secs,
        })
    }
}

#[async_trait]
impl SchedulingPrimitive for SqliteScheduler {
    async fn schedule_once(&self, run_at: i64, hook: &str, args: &Value) -> Result<bool, SchedulerError> {
        self.insert(ScheduledEvent::new(hook, args, run_at, None)).await
    }

    async fn schedule_recurring(
        &self,
        first_run: i64,
        interval_secs: i64,
        hook: &str,
        args: &Value,
    ) -> Result<bool, SchedulerError> {
        if interval_secs <= 0 {
            return Err(SchedulerError::Scheduling(format!(
                "invalid interval {}s for '{}'",
                interval_secs, hook
            )));
        }
        self.insert(ScheduledEvent::new(hook, args, first_run, Some(interval_secs)))
            .await
    }

    async fn clear_scheduled(&self, hook: &str, args: Option<&Value>) -> Result<usize, SchedulerError> {
        let hook = hook.to_string();
        let args = args.map(serde_json::to_string).transpose()?;
        let cleared = self
            .conn
            .call(move |conn| {
                let count = match args {
                    Some(args) => conn.execute(
                        "DELETE FROM scheduled_events WHERE hook = ?1 AND args = ?2",
                        params![hook, args],
                    )?,
                    None => conn.execute("DELETE FROM scheduled_events WHERE hook = ?1", params![hook])?,
                };
                Ok(count)
            })
            .await?;
        Ok(cleared)
    }

    async fn scheduled_event(&self, hook: &str, args: Option<&Value>) -> Result<Option<ScheduledEvent>, SchedulerError> {
        let hook = hook.to_string();
        let args = args.map(serde_json::to_string).transpose()?;
        let raw = self
            .conn
            .call(move |conn| {
                let raw = match args {
                    Some(args) => conn
                        .query_row(
                            "SELECT id, hook, args, run_at, interval_secs FROM scheduled_events
                             WHERE hook = ?1 AND args = ?2 ORDER BY run_at LIMIT 1",
                            params![hook, args],
                            Self::row_to_event,
                        )
                        .optional()?,
                    None => conn
                        .query_row(
                            "SELECT id, hook, args, run_at, interval_secs FROM scheduled_events
                             WHERE hook = ?1 ORDER BY run_at LIMIT 1",
                            params![hook],
                            Self::row_to_event,
                        )
                        .optional()?,
                };
                Ok(raw)
            })
            .await?;
        raw.map(Self::decode).transpose()
    }

    async fn take_due(&self, now: i64) -> Result<Vec<ScheduledEvent>, SchedulerError> {
        let rows = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let rows = {
                    let mut stmt = tx.prepare(
                        "SELECT id, hook, args, run_at, interval_secs FROM scheduled_events
                         WHERE run_at <= ?1 ORDER BY run_at",
                    )?;
                    let rows = stmt
                        .query_map(params![now], Self::row_to_event)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                for (id, _, _, run_at, interval_secs) in &rows {
                    match interval_secs.filter(|i| *i > 0) {
                        Some(interval) => {
                            tx.execute(
                                "UPDATE scheduled_events SET run_at = ?1 WHERE id = ?2",
                                params![advance_past(*run_at, interval, now), id],
                            )?;
                        }
                        None => {
                            tx.execute("DELETE FROM scheduled_events WHERE id = ?1", params![id])?;
                        }
                    }
                }
                tx.commit()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }
}

#[cfg(test)]
#[path = "substrate_tests.rs"]
mod tests;
