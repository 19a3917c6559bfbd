//! Namespaced key/value storage with optional expiry
//!
//! Values are opaque strings. An entry whose expiry has passed reads as absent;
//! every `put` replaces the value and its expiry together.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Persistent namespaced store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Insert or replace; `ttl` of `None` never expires
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;
}

fn expiry_ms(clock: &dyn Clock, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        clock.now().timestamp_millis().saturating_add(ttl_ms)
    })
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

/// In-process store; expiry is honoured on read
#[derive(Debug)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<(String, String), MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let now_ms = self.clock.now().timestamp_millis();
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .filter(|entry| entry.expires_at_ms.is_none_or(|at| at > now_ms))
            .map(|entry| entry.value.clone()))
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at_ms: expiry_ms(self.clock.as_ref(), ttl),
        };
        self.entries
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), entry);
        Ok(())
    }
}

/// SQL to create the key/value table
pub const CREATE_KV_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    expires_at INTEGER,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (namespace, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_entries_expires ON kv_entries(expires_at);
"#;

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteKvStore {
    /// Create a store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Open (creating if missing) the database file and initialise the schema
    pub async fn connect(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path.display()))?
                .journal_mode(SqliteJournalMode::Wal)
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// In-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // In-memory requires single connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_KV_TABLE_SQL).execute(&self.pool).await?;
        debug!("Key/value table initialized");
        Ok(())
    }

    /// Delete every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let now_ms = self.clock.now().timestamp_millis();
        let result = sqlx::query(
            "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(Error::Storage)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted = deleted, "Purged expired key/value entries");
        }
        Ok(deleted)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let now_ms = self.clock.now().timestamp_millis();
        let row = sqlx::query(
            r#"
            SELECT value FROM kv_entries
            WHERE namespace = ? AND key = ?
              AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Storage)?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(expiry_ms(self.clock.as_ref(), ttl))
        .execute(&self.pool)
        .await
        .map_err(Error::Storage)?;

        debug!(namespace = %namespace, key = %key, "Stored key/value entry");
        Ok(())
    }
}
