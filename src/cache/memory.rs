//! In-process cache tier backed by a hash map.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::traits::CacheTier;

struct Entry {
  value: Value,
  expires_at: Option<Instant>,
}

impl Entry {
  fn is_expired(&self, now: Instant) -> bool {
    self.expires_at.is_some_and(|at| now >= at)
  }
}

/// Cache tier that keeps entries in local memory.
#[derive(Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored entries, expired ones included until they are read.
  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.clear();
    }
  }
}

impl CacheTier for MemoryCache {
  fn set(&self, key: &str, value: &Value, ttl_millis: u64) -> bool {
    let Ok(mut entries) = self.entries.lock() else {
      return false;
    };
    let expires_at = (ttl_millis > 0).then(|| Instant::now() + Duration::from_millis(ttl_millis));
    entries.insert(
      key.to_string(),
      Entry {
        value: value.clone(),
        expires_at,
      },
    );
    true
  }

  fn get(&self, key: &str) -> Option<Value> {
    let mut entries = self.entries.lock().ok()?;
    if entries.get(key)?.is_expired(Instant::now()) {
      entries.remove(key);
      return None;
    }
    entries.get(key).map(|e| e.value.clone())
  }

  fn name(&self) -> &'static str {
    "memory"
  }
}
