//! Entry point wiring configuration, transport, cache tier and resolver.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheLayer, CacheTier, MemcachedCache, MemoryCache, SqliteCache};
use crate::collection::ResultPage;
use crate::config::{CacheBackend, CacheConfig, Config};
use crate::entity::{Entity, Grouping, SchemaCodec};
use crate::error::Result;
use crate::query::QuerySpec;
use crate::remote::{CachedTransport, Credentials, EntityApi, HttpTransport, NamespaceConditions, Transport};
use crate::resolver::EntityResolver;

/// Client for one application on one server.
#[derive(Debug, Clone)]
pub struct Sdk {
  resolver: Arc<EntityResolver>,
  page_ttl_millis: u64,
}

impl Sdk {
  /// Build a client from configuration, reading the application key from the
  /// environment.
  pub fn connect(config: &Config) -> Result<Self> {
    let key = Config::get_application_key()?;
    Self::from_config(config, key)
  }

  pub fn from_config(config: &Config, application_key: String) -> Result<Self> {
    let cache = open_tier(&config.cache, &config.application_id)
      .map(CacheLayer::new)
      .unwrap_or_default();

    let http = HttpTransport::with_timeout(
      &config.server,
      Credentials {
        application_id: config.application_id.clone(),
        application_key,
      },
      Duration::from_secs(config.timeout_secs),
    )?;
    let transport = Arc::new(CachedTransport::new(http, cache.clone()));

    info!(server = %config.server, cache = ?config.cache.backend, "entity client ready");
    Ok(Self::from_parts(transport, cache, SchemaCodec::default(), config))
  }

  /// Build a client over an arbitrary transport.
  pub fn from_parts(
    transport: Arc<dyn Transport>,
    cache: CacheLayer,
    codec: SchemaCodec,
    config: &Config,
  ) -> Self {
    let api = EntityApi::new(transport, codec).with_call_ttl(config.cache.call_ttl_ms);
    let resolver = EntityResolver::new(api, cache, config.application_id.as_str())
      .with_entity_ttl(config.cache.entity_ttl_ms);

    Self {
      resolver: Arc::new(resolver),
      page_ttl_millis: config.cache.page_ttl_ms,
    }
  }

  pub fn resolver(&self) -> &Arc<EntityResolver> {
    &self.resolver
  }

  pub fn codec(&self) -> &SchemaCodec {
    self.resolver.codec()
  }

  /// An unloaded page over `spec`.
  pub fn create_result_page(&self, spec: QuerySpec) -> ResultPage {
    ResultPage::new(self.resolver.clone(), spec).with_page_ttl(self.page_ttl_millis)
  }

  pub async fn get_entity(&self, object_type: &str, id: &str) -> Result<Option<Arc<Entity>>> {
    self.resolver.get_by_id(object_type, id).await
  }

  pub async fn get_entity_by_unique_name(
    &self,
    object_type: &str,
    unique_name: &str,
    namespace: &NamespaceConditions,
  ) -> Result<Option<Arc<Entity>>> {
    self
      .resolver
      .get_by_unique_name(object_type, unique_name, namespace)
      .await
  }

  pub async fn get_groupings(&self, object_type: &str, field_name: &str) -> Result<Vec<Grouping>> {
    self.resolver.api().get_groupings(object_type, field_name).await
  }

  pub async fn save_entity(&self, entity: Entity) -> Result<Arc<Entity>> {
    self.resolver.save(entity).await
  }

  pub async fn delete_entity(&self, entity: &Entity) -> Result<bool> {
    self.resolver.delete(entity).await
  }
}

/// Open the configured cache tier. An unusable sqlite file or unreachable
/// memcached pool degrades to no tier.
fn open_tier(config: &CacheConfig, application_id: &str) -> Option<Arc<dyn CacheTier>> {
  match config.backend {
    CacheBackend::None => None,
    CacheBackend::Memory => Some(Arc::new(MemoryCache::new())),
    CacheBackend::Sqlite => {
      let opened = match &config.path {
        Some(path) => SqliteCache::open_at(path),
        None => SqliteCache::open(),
      };
      match opened {
        Ok(cache) => {
          if let Err(e) = cache.purge_expired() {
            warn!(error = %e, "failed to purge expired cache entries");
          }
          Some(Arc::new(cache))
        }
        Err(e) => {
          warn!(error = %e, "sqlite cache unavailable, continuing without a cache tier");
          None
        }
      }
    }
    CacheBackend::Memcached => match MemcachedCache::connect(&config.servers, application_id) {
      Ok(cache) => Some(Arc::new(cache)),
      Err(e) => {
        warn!(error = %e, "memcached unavailable, continuing without a cache tier");
        None
      }
    },
  }
}
