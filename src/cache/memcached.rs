//! Memcached-backed cache tier, shared by every client pointed at the same
//! servers.

use chrono::Utc;
use md5::{Digest, Md5};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use super::traits::{CacheError, CacheTier};

pub const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;
/// Expirations above this many seconds are read by memcached as unix timestamps.
const MAX_RELATIVE_EXPIRATION_SECS: u64 = 60 * 60 * 24 * 30;
const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Cache tier stored in one or more memcached servers.
///
/// Keys are prefixed with a namespace (the application id) so several
/// applications can share a pool.
pub struct MemcachedCache {
  client: memcache::Client,
  namespace: String,
}

impl MemcachedCache {
  /// Connect to `servers`, given as `host`, `host:port` or `memcache://` URLs.
  pub fn connect(servers: &[String], namespace: &str) -> Result<Self, CacheError> {
    if servers.is_empty() {
      return Err(CacheError::Unavailable("no memcached servers configured".into()));
    }

    let urls: Vec<String> = servers.iter().map(|s| server_url(s)).collect();
    let client = memcache::Client::connect(urls)?;
    client.set_read_timeout(Some(IO_TIMEOUT))?;
    client.set_write_timeout(Some(IO_TIMEOUT))?;

    Ok(Self {
      client,
      namespace: namespace.to_string(),
    })
  }

  fn try_set(&self, key: &str, value: &Value, ttl_millis: u64) -> Result<(), CacheError> {
    let data = serde_json::to_string(value)?;
    let expiration = expiration_secs(ttl_millis, Utc::now().timestamp());
    self
      .client
      .set(&namespaced_key(&self.namespace, key), data.as_str(), expiration)?;
    Ok(())
  }

  fn try_get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    let data: Option<String> = self.client.get(&namespaced_key(&self.namespace, key))?;
    match data {
      Some(data) => Ok(Some(serde_json::from_str(&data)?)),
      None => Ok(None),
    }
  }
}

impl CacheTier for MemcachedCache {
  fn set(&self, key: &str, value: &Value, ttl_millis: u64) -> bool {
    match self.try_set(key, value, ttl_millis) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, error = %e, "failed to write memcached entry");
        false
      }
    }
  }

  fn get(&self, key: &str) -> Option<Value> {
    self.try_get(key).unwrap_or_else(|e| {
      warn!(key, error = %e, "failed to read memcached entry");
      None
    })
  }

  fn name(&self) -> &'static str {
    "memcached"
  }
}

fn server_url(server: &str) -> String {
  if server.contains("://") {
    server.to_string()
  } else if server.contains(':') {
    format!("memcache://{}", server)
  } else {
    format!("memcache://{}:{}", server, DEFAULT_MEMCACHED_PORT)
  }
}

/// Prefix with the namespace. Keys memcached would reject (too long, or with
/// whitespace or control bytes) are replaced by their md5.
fn namespaced_key(namespace: &str, key: &str) -> String {
  let full = if namespace.is_empty() {
    key.to_string()
  } else {
    format!("{}-{}", namespace, key)
  };

  let acceptable = full.len() <= MAX_KEY_LEN
    && !full
      .bytes()
      .any(|b| b.is_ascii_whitespace() || b.is_ascii_control());
  if acceptable {
    return full;
  }

  let mut hasher = Md5::new();
  hasher.update(full.as_bytes());
  hex::encode(hasher.finalize())
}

/// Memcached expiration for a TTL in milliseconds. 0 stays 0 (never expires);
/// anything else rounds up to whole seconds, switching to an absolute unix
/// time past memcached's 30 day relative limit.
fn expiration_secs(ttl_millis: u64, now_unix: i64) -> u32 {
  if ttl_millis == 0 {
    return 0;
  }

  let secs = ttl_millis.div_ceil(1000);
  if secs <= MAX_RELATIVE_EXPIRATION_SECS {
    return secs as u32;
  }

  let now = u64::try_from(now_unix).unwrap_or(0);
  u32::try_from(now.saturating_add(secs)).unwrap_or(u32::MAX)
}
