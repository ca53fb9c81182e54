//! Paged views over query results.

use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheKey;
use crate::entity::Entity;
use crate::error::Result;
use crate::query::QuerySpec;
use crate::remote::ApiQueryResponse;
use crate::resolver::EntityResolver;

/// Default lifetime of cached result pages.
pub const DEFAULT_PAGE_TTL_MILLIS: u64 = 3000;

/// One page of a query's results, fetched on demand.
///
/// Only the current page is held in memory. Asking for an index outside it
/// moves the page to the one containing that index and fetches it.
#[derive(Debug)]
pub struct ResultPage {
  resolver: Arc<EntityResolver>,
  spec: QuerySpec,
  page_ttl_millis: u64,
  entities: Vec<Arc<Entity>>,
  total_count: usize,
  loaded: bool,
}

impl ResultPage {
  pub fn new(resolver: Arc<EntityResolver>, spec: QuerySpec) -> Self {
    Self {
      resolver,
      spec,
      page_ttl_millis: DEFAULT_PAGE_TTL_MILLIS,
      entities: Vec::new(),
      total_count: 0,
      loaded: false,
    }
  }

  pub fn with_page_ttl(mut self, ttl_millis: u64) -> Self {
    self.page_ttl_millis = ttl_millis;
    self
  }

  pub fn spec(&self) -> &QuerySpec {
    &self.spec
  }

  /// Mutable access to the query. The page is reloaded on next access.
  pub fn spec_mut(&mut self) -> &mut QuerySpec {
    self.loaded = false;
    &mut self.spec
  }

  pub fn offset(&self) -> usize {
    self.spec.offset()
  }

  pub fn limit(&self) -> usize {
    self.spec.limit()
  }

  /// Total number of matches reported by the last load. 0 before any load.
  pub fn total_count(&self) -> usize {
    self.total_count
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded
  }

  /// Entities on the current page.
  pub fn entities(&self) -> &[Arc<Entity>] {
    &self.entities
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
    self.entities.iter()
  }

  pub fn len(&self) -> usize {
    self.entities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entities.is_empty()
  }

  pub fn page_count(&self) -> usize {
    self.total_count.div_ceil(self.limit())
  }

  /// Offset of the following page, if there is one.
  pub fn next_page_offset(&self) -> Option<usize> {
    let next = self.offset() + self.limit();
    (next < self.total_count).then_some(next)
  }

  /// Offset of the preceding page, if there is one.
  pub fn prev_page_offset(&self) -> Option<usize> {
    (self.offset() > 0).then(|| self.offset().saturating_sub(self.limit()))
  }

  /// Clear and repopulate the current page.
  pub async fn load(&mut self) -> Result<()> {
    self.entities.clear();
    self.loaded = false;

    let key = CacheKey::page(
      self.resolver.application_id(),
      self.spec.object_type(),
      &self.spec.fingerprint(),
    );

    let cached = self
      .resolver
      .cache()
      .lookup(&key)
      .and_then(|value| serde_json::from_value::<ApiQueryResponse>(value).ok());

    let response = match cached {
      Some(response) => response,
      None => {
        let response = self.resolver.api().execute_query(&self.spec).await?;
        if let Ok(value) = serde_json::to_value(&response) {
          self.resolver.cache().store(&key, &value, self.page_ttl_millis);
        }
        response
      }
    };

    let codec = self.resolver.codec();
    let mut entities = Vec::with_capacity(response.entities.len());
    for data in &response.entities {
      entities.push(self.resolver.register(codec.decode_value(data)?));
    }

    debug!(
      object_type = self.spec.object_type(),
      offset = self.spec.offset(),
      count = entities.len(),
      total = response.total_num,
      "loaded result page"
    );

    self.entities = entities;
    self.total_count = response.total_num;
    self.loaded = true;
    Ok(())
  }

  /// Entity at an absolute index into the full result set.
  ///
  /// Loads the containing page if needed. `Ok(None)` when the index is past
  /// the end of the results.
  pub async fn get(&mut self, index: usize) -> Result<Option<Arc<Entity>>> {
    if self.loaded && index >= self.total_count {
      return Ok(None);
    }

    let limit = self.limit();
    let page_offset = (index / limit) * limit;
    if !self.loaded || page_offset != self.offset() {
      self.spec.set_offset(page_offset);
      self.load().await?;
    }

    if index >= self.total_count {
      return Ok(None);
    }
    Ok(self.entities.get(index - page_offset).cloned())
  }

  /// Move to another page and load it.
  pub async fn seek(&mut self, offset: usize) -> Result<()> {
    self.spec.set_offset(offset);
    self.load().await
  }
}
