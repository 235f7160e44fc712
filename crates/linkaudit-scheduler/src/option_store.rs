//! Key/value option store backing status, history and the manual queue.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::SchedulerError;

/// Read-modify-write function applied atomically by [`OptionStore::update`].
pub type OptionUpdate = Box<dyn FnOnce(Option<Value>) -> Value + Send>;

/// Durable key/value store of JSON option values.
///
/// `update` is the only way to read and write a value without another writer
/// slipping in between; every component that merges into existing state uses it.
#[async_trait]
pub trait OptionStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Value>, SchedulerError>;

    /// Overwrite a value.
    async fn set(&self, key: &str, value: Value) -> Result<(), SchedulerError>;

    /// Atomically replace a value with `f(current)` and return the new value.
    async fn update(&self, key: &str, f: OptionUpdate) -> Result<Value, SchedulerError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SchedulerError>;
}

/// In-memory option store for tests and single-process use.
pub struct MemoryOptionStore {
    options: RwLock<HashMap<String, Value>>,
}

impl MemoryOptionStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            options: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryOptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OptionStore for MemoryOptionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, SchedulerError> {
        Ok(self.options.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SchedulerError> {
        self.options.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn update(&self, key: &str, f: OptionUpdate) -> Result<Value, SchedulerError> {
        let mut options = self.options.write().await;
        let next = f(options.get(key).cloned());
        options.insert(key.to_string(), next.clone());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), SchedulerError> {
        self.options.write().await.remove(key);
        Ok(())
    }
}

const OPTIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS options (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed option store.
///
/// Several processes may open the same file; `update` runs inside an
/// immediate transaction so concurrent read-modify-write cycles serialize.
pub struct SqliteOptionStore {
    conn: Connection,
}

impl SqliteOptionStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::with_connection(conn).await
    }

    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    /// Wrap an existing connection, creating the table if needed.
    pub async fn with_connection(conn: Connection) -> Result<Self, SchedulerError> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(OPTIONS_SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    fn read_value(conn: &rusqlite::Connection, key: &str) -> Result<Option<Value>, tokio_rusqlite::Error> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM options WHERE name = ?1", [key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e))),
            None => Ok(None),
        }
    }

    fn write_value(conn: &rusqlite::Connection, key: &str, value: &Value) -> Result<(), tokio_rusqlite::Error> {
        let raw = serde_json::to_string(value).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
        conn.execute(
            "INSERT INTO options (name, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl OptionStore for SqliteOptionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, SchedulerError> {
        let key = key.to_string();
        let value = self.conn.call(move |conn| Self::read_value(conn, &key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SchedulerError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| Self::write_value(conn, &key, &value))
            .await?;
        Ok(())
    }

    async fn update(&self, key: &str, f: OptionUpdate) -> Result<Value, SchedulerError> {
        let owned_key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let key = owned_key;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current = Self::read_value(&tx, &key)?;
                let next = f(current);
                Self::write_value(&tx, &key, &next)?;
                tx.commit()?;
                Ok(next)
            })
            .await?;
        debug!("Updated option '{}'", key);
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), SchedulerError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM options WHERE name = ?1", [&key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "option_store_tests.rs"]
mod tests;
