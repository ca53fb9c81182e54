//! Core traits and types for the caching system.

use serde_json::Value;
use thiserror::Error;

/// A pluggable key-value cache consulted before the remote service.
///
/// Implementations never fail loudly: backend problems turn a `get` into a miss
/// and a `set` into `false`. Callers treat the tier as advisory.
pub trait CacheTier: Send + Sync {
  /// Store `value` under `key` for `ttl_millis` milliseconds. A TTL of 0 means
  /// the entry never expires. Returns false when the value was not stored.
  fn set(&self, key: &str, value: &Value, ttl_millis: u64) -> bool;

  /// Get a live value, or `None` on a miss or an expired entry.
  fn get(&self, key: &str) -> Option<Value>;

  /// Short backend name for logs.
  fn name(&self) -> &'static str;
}

/// Errors raised inside cache backends before they are absorbed.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("memcached error: {0}")]
  Memcache(#[from] memcache::MemcacheError),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("cache lock poisoned")]
  LockPoisoned,

  #[error("{0}")]
  Unavailable(String),
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// In-process identity map
  IdentityMap,
  /// Persistent cache tier
  Tier,
  /// Fresh data from the remote service
  Network,
}
