use crate::error::{CacheError, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A value read back from the cache together with the time it was written
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
}

/// Cache manager using SQLite
///
/// Values are stored as JSON under a `(namespace, key)` pair. Nothing in
/// here is authoritative: deleting the file just means the next lookup
/// misses and the caller fetches again.
pub struct CacheManager {
    conn: Mutex<Connection>,
}

impl CacheManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        debug!("Opened cache database at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Throwaway cache, mostly for tests and `--no-cache` runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                data TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, cache_key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_cached_at
             ON cache_entries(cached_at)",
            [],
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<CachedEntry<T>>> {
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT data, cached_at FROM cache_entries
                 WHERE namespace = ?1 AND cache_key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((data, cached_at)) => Ok(Some(CachedEntry {
                value: serde_json::from_str(&data)?,
                cached_at: from_timestamp(cached_at),
            })),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        self.set_at(namespace, key, value, Utc::now())
    }

    /// Store a value with an explicit write time (replaces any prior value)
    pub fn set_at<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        cached_at: DateTime<Utc>,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (namespace, cache_key, data, cached_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace, key, data, cached_at.timestamp()],
        )?;
        Ok(())
    }

    /// Returns true if something was actually removed
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND cache_key = ?2",
            params![namespace, key],
        )?;
        Ok(removed > 0)
    }

    /// Wipe one namespace, or everything when `namespace` is None
    pub fn clear(&self, namespace: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = match namespace {
            Some(ns) => conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1",
                params![ns],
            )?,
            None => conn.execute("DELETE FROM cache_entries", [])?,
        };
        debug!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    pub fn len(&self, namespace: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self, namespace: &str) -> Result<bool> {
        Ok(self.len(namespace)? == 0)
    }

    /// Drop entries written more than `max_age` ago
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).timestamp();
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE cached_at < ?1",
            params![cutoff],
        )?;
        debug!("Pruned {} cache entries older than {}", removed, max_age);
        Ok(removed)
    }
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
