//! Transport wrapper that caches call responses.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::transport::{Request, Transport};
use crate::cache::{CacheKey, CacheLayer};
use crate::error::Result;

/// Transport with transparent response caching.
///
/// Requests issued with a non-zero `cache_ttl_millis` are looked up in the cache
/// layer first and stored on success. Everything else passes straight through.
pub struct CachedTransport<T: Transport> {
  inner: T,
  cache: CacheLayer,
}

impl<T: Transport> CachedTransport<T> {
  pub fn new(inner: T, cache: CacheLayer) -> Self {
    Self { inner, cache }
  }

  pub fn inner(&self) -> &T {
    &self.inner
  }

  async fn send(&self, request: Request) -> Result<Value> {
    if request.cache_ttl_millis == 0 || !self.cache.is_enabled() {
      return self.inner.call(request).await;
    }

    let key = CacheKey::Call {
      method: request.method.to_string(),
      action: request.action.clone(),
      controller: request.controller.clone(),
      payload: request.payload.clone(),
    };
    let ttl = request.cache_ttl_millis;

    self
      .cache
      .fetch_json(&key, ttl, || self.inner.call(request))
      .await
  }
}

impl<T: Transport> Transport for CachedTransport<T> {
  fn call(&self, request: Request) -> BoxFuture<'_, Result<Value>> {
    self.send(request).boxed()
  }
}
