//! Cache layer that orchestrates tier lookups with network fetching.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::traits::CacheTier;
use crate::error::Result;

/// Optional cache tier plus the policy for talking to it.
///
/// Every tier failure is absorbed here: a failed read is a miss, a failed write
/// is logged and forgotten. Callers never see cache errors.
#[derive(Clone, Default)]
pub struct CacheLayer {
  tier: Option<Arc<dyn CacheTier>>,
}

impl CacheLayer {
  /// Create a cache layer over the given tier.
  pub fn new(tier: Arc<dyn CacheTier>) -> Self {
    Self { tier: Some(tier) }
  }

  /// A layer without a tier: every lookup misses, every store is dropped.
  pub fn disabled() -> Self {
    Self { tier: None }
  }

  pub fn is_enabled(&self) -> bool {
    self.tier.is_some()
  }

  pub fn lookup(&self, key: &CacheKey) -> Option<Value> {
    let tier = self.tier.as_ref()?;
    let value = tier.get(&key.render());
    debug!(
      tier = tier.name(),
      key = %key.description(),
      hit = value.is_some(),
      "cache lookup"
    );
    value
  }

  /// Best-effort write. Returns whether the tier accepted the value.
  pub fn store(&self, key: &CacheKey, value: &Value, ttl_millis: u64) -> bool {
    let Some(tier) = self.tier.as_ref() else {
      return false;
    };
    let stored = tier.set(&key.render(), value, ttl_millis);
    if !stored {
      warn!(tier = tier.name(), key = %key.description(), "cache write failed");
    }
    stored
  }

  /// Fetch a JSON response with a cache-first strategy.
  ///
  /// 1. Check the tier - a hit is returned immediately
  /// 2. On a miss, call the fetcher
  /// 3. Store the response unless it is an error payload
  pub async fn fetch_json<F, Fut>(&self, key: &CacheKey, ttl_millis: u64, fetcher: F) -> Result<Value>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    if let Some(cached) = self.lookup(key) {
      return Ok(cached);
    }

    let data = fetcher().await?;
    if data.get("error").is_none() {
      self.store(key, &data, ttl_millis);
    }
    Ok(data)
  }
}

impl std::fmt::Debug for CacheLayer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheLayer")
      .field("tier", &self.tier.as_ref().map(|t| t.name()))
      .finish()
  }
}
