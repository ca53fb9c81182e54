//! SQLite-backed persistent cache tier.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use super::traits::{CacheError, CacheTier};

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
-- Serialized JSON keyed by cache key
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    -- Unix millis; NULL never expires
    expires_at INTEGER,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
    ON cache_entries(expires_at);
"#;

/// Cache tier persisted to a SQLite database, shared between runs of the client.
pub struct SqliteCache {
  conn: Mutex<Connection>,
}

impl SqliteCache {
  /// Open the cache at the default location.
  pub fn open() -> Result<Self, CacheError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self, CacheError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::from_connection(conn)
  }

  /// A cache that lives only as long as this value.
  pub fn in_memory() -> Result<Self, CacheError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, CacheError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, CacheError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::Unavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("entsdk").join("cache.db"))
  }

  /// Delete every expired entry. Returns the number of rows removed.
  pub fn purge_expired(&self) -> Result<usize, CacheError> {
    let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
    let removed = conn.execute(
      "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?",
      params![Utc::now().timestamp_millis()],
    )?;
    Ok(removed)
  }

  fn try_set(&self, key: &str, value: &Value, ttl_millis: u64) -> Result<(), CacheError> {
    let data = serde_json::to_vec(value)?;
    let expires_at = (ttl_millis > 0)
      .then(|| {
        let ttl = i64::try_from(ttl_millis).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_add(ttl)
      });

    let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (cache_key, data, expires_at, cached_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![key, data, expires_at],
    )?;
    Ok(())
  }

  fn try_get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;

    let row: Option<(Vec<u8>, Option<i64>)> = conn
      .query_row(
        "SELECT data, expires_at FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    let Some((data, expires_at)) = row else {
      return Ok(None);
    };

    if expires_at.is_some_and(|at| at <= Utc::now().timestamp_millis()) {
      conn.execute(
        "DELETE FROM cache_entries WHERE cache_key = ?",
        params![key],
      )?;
      return Ok(None);
    }

    Ok(Some(serde_json::from_slice(&data)?))
  }
}

impl CacheTier for SqliteCache {
  fn set(&self, key: &str, value: &Value, ttl_millis: u64) -> bool {
    match self.try_set(key, value, ttl_millis) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, error = %e, "failed to write cache entry");
        false
      }
    }
  }

  fn get(&self, key: &str) -> Option<Value> {
    self.try_get(key).unwrap_or_else(|e| {
      warn!(key, error = %e, "failed to read cache entry");
      None
    })
  }

  fn name(&self) -> &'static str {
    "sqlite"
  }
}
