//! SQLite-backed [`KvStore`].

use super::{KvStore, StoreError};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Key-value store persisted in a single SQLite table.
///
/// # Schema
/// ```sql
/// CREATE TABLE kv (
///     key        TEXT PRIMARY KEY,
///     value      BLOB NOT NULL,
///     expires_at INTEGER           -- unix seconds, NULL = never
/// );
/// ```
///
/// Expired rows read as not found and are removed lazily on access or in bulk
/// by [`KvStore::cleanup_expired`].
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open KV store at {}", path.display()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at);",
        )
        .context("Failed to create kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn put(&self, key: &str, value: &[u8], expires_at: Option<i64>) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }
}

impl KvStore for SqliteKvStore {
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let row: Option<(Vec<u8>, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= Utc::now().timestamp() => {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Err(StoreError::NotFound)
            }
            Some((value, _)) => Ok(value),
            None => Err(StoreError::NotFound),
        }
    }

    fn store(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.put(key, value, None)
    }

    fn store_ttl(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), StoreError> {
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 2);
        self.put(key, value, Some(Utc::now().timestamp().saturating_add(ttl)))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let rows = conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, Utc::now().timestamp()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(removed)
    }
}
