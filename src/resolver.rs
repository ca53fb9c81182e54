//! Identity-mapped entity resolution.
//!
//! Lookups go through three tiers in a fixed order:
//! 1. The in-process identity map - always a hit once an entity is loaded
//! 2. The optional cache tier - decoded and registered on a hit
//! 3. The remote service, bypassing any call cache - decoded, registered and
//!    written through to the tier
//!
//! Whatever the source, one `(object_type, id)` pair maps to one shared
//! [`Entity`] instance for the lifetime of the resolver, until it is evicted.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheLayer, CacheSource};
use crate::entity::{Entity, SchemaCodec};
use crate::error::{Error, Result};
use crate::remote::{EntityApi, NamespaceConditions};

/// Default lifetime of entities written to the cache tier.
pub const DEFAULT_ENTITY_TTL_MILLIS: u64 = 3000;

type TypeBuckets<V> = HashMap<String, HashMap<String, V>>;
type FlightLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Resolves entities by id or unique name, guaranteeing a single in-memory
/// instance per identity.
pub struct EntityResolver {
  api: EntityApi,
  cache: CacheLayer,
  application_id: String,
  entity_ttl_millis: u64,
  loaded_by_id: RwLock<TypeBuckets<Arc<Entity>>>,
  id_by_unique_name: RwLock<TypeBuckets<String>>,
  flights: Arc<FlightLocks>,
}

/// Held while a miss is being resolved, so concurrent lookups for the same
/// key wait for it instead of issuing their own fetch.
struct Flight {
  key: String,
  locks: Arc<FlightLocks>,
  guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Flight {
  fn drop(&mut self) {
    let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
    // Only the map and our guard hold the lock: nobody is waiting on it
    if locks
      .get(&self.key)
      .is_some_and(|lock| Arc::strong_count(lock) <= 2)
    {
      locks.remove(&self.key);
    }
    self.guard.take();
  }
}

impl EntityResolver {
  pub fn new(api: EntityApi, cache: CacheLayer, application_id: impl Into<String>) -> Self {
    Self {
      api,
      cache,
      application_id: application_id.into(),
      entity_ttl_millis: DEFAULT_ENTITY_TTL_MILLIS,
      loaded_by_id: RwLock::new(HashMap::new()),
      id_by_unique_name: RwLock::new(HashMap::new()),
      flights: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Set how long entities written to the cache tier stay valid.
  pub fn with_entity_ttl(mut self, ttl_millis: u64) -> Self {
    self.entity_ttl_millis = ttl_millis;
    self
  }

  pub fn api(&self) -> &EntityApi {
    &self.api
  }

  pub fn codec(&self) -> &SchemaCodec {
    self.api.codec()
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn application_id(&self) -> &str {
    &self.application_id
  }

  /// Get an entity by id. `Ok(None)` when the service has no such record.
  pub async fn get_by_id(&self, object_type: &str, id: &str) -> Result<Option<Arc<Entity>>> {
    if let Some(entity) = self.loaded(object_type, id) {
      trace_source(object_type, id, CacheSource::IdentityMap);
      return Ok(Some(entity));
    }

    let _flight = self.begin_flight(format!("id:{}:{}", object_type, id)).await;

    // Someone else may have resolved it while we waited
    if let Some(entity) = self.loaded(object_type, id) {
      trace_source(object_type, id, CacheSource::IdentityMap);
      return Ok(Some(entity));
    }

    let key = CacheKey::entity(&self.application_id, object_type, id);
    if let Some(entity) = self.from_tier(&key) {
      trace_source(object_type, id, CacheSource::Tier);
      return Ok(Some(self.register(entity)));
    }

    let Some(data) = self.api.fetch_entity_fresh(object_type, id).await? else {
      debug!(object_type, id, "entity not found");
      return Ok(None);
    };
    let entity = self.codec().decode(&data)?;
    self
      .cache
      .store(&key, &Value::Object(data), self.entity_ttl_millis);

    trace_source(object_type, id, CacheSource::Network);
    Ok(Some(self.register(entity)))
  }

  /// Get an entity by its unique name, optionally scoped by namespace
  /// conditions. Resolves to the same instance as [`Self::get_by_id`].
  pub async fn get_by_unique_name(
    &self,
    object_type: &str,
    unique_name: &str,
    namespace: &NamespaceConditions,
  ) -> Result<Option<Arc<Entity>>> {
    if let Some(id) = self.id_for_unique_name(object_type, unique_name) {
      return self.get_by_id(object_type, &id).await;
    }

    let _flight = self
      .begin_flight(format!("uname:{}:{}", object_type, unique_name))
      .await;

    if let Some(id) = self.id_for_unique_name(object_type, unique_name) {
      return self.get_by_id(object_type, &id).await;
    }

    let uname_key = CacheKey::unique_name(
      &self.application_id,
      object_type,
      unique_name,
      Value::Object(namespace.clone()),
    );

    if let Some(Value::String(id)) = self.cache.lookup(&uname_key) {
      if let Some(entity) = self.get_by_id(object_type, &id).await? {
        self.remember_unique_name(object_type, unique_name, &id);
        return Ok(Some(entity));
      }
    }

    let Some(data) = self
      .api
      .fetch_entity_by_unique_name_fresh(object_type, unique_name, namespace)
      .await?
    else {
      debug!(object_type, unique_name, "entity not found by unique name");
      return Ok(None);
    };

    let entity = self.codec().decode(&data)?;
    let id = entity
      .id()
      .ok_or_else(|| Error::Schema(format!("{} {} has an unusable id", object_type, unique_name)))?;

    self.cache.store(
      &CacheKey::entity(&self.application_id, entity.object_type(), &id),
      &Value::Object(data),
      self.entity_ttl_millis,
    );
    self
      .cache
      .store(&uname_key, &Value::String(id.clone()), self.entity_ttl_millis);

    let canonical = self.register(entity);
    self.remember_unique_name(object_type, unique_name, &id);
    Ok(Some(canonical))
  }

  /// Add an entity to the identity map unless one with the same identity is
  /// already there. Returns whichever instance is canonical.
  ///
  /// Entities without an id are returned as-is and not tracked.
  pub fn register(&self, entity: Entity) -> Arc<Entity> {
    let Some(id) = entity.id() else {
      return Arc::new(entity);
    };

    let mut loaded = self
      .loaded_by_id
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    loaded
      .entry(entity.object_type().to_string())
      .or_default()
      .entry(id)
      .or_insert_with(|| Arc::new(entity))
      .clone()
  }

  /// Peek at the identity map without touching any other tier.
  pub fn loaded(&self, object_type: &str, id: &str) -> Option<Arc<Entity>> {
    let loaded = self
      .loaded_by_id
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    loaded.get(object_type)?.get(id).cloned()
  }

  /// Number of entities currently held in the identity map.
  pub fn loaded_count(&self) -> usize {
    let loaded = self
      .loaded_by_id
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    loaded.values().map(HashMap::len).sum()
  }

  /// Drop an entity from the identity map, along with any unique names that
  /// point at it. The next lookup builds a fresh instance.
  pub fn evict(&self, object_type: &str, id: &str) -> Option<Arc<Entity>> {
    let removed = {
      let mut loaded = self
        .loaded_by_id
        .write()
        .unwrap_or_else(PoisonError::into_inner);
      loaded.get_mut(object_type).and_then(|bucket| bucket.remove(id))
    };

    let mut names = self
      .id_by_unique_name
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(bucket) = names.get_mut(object_type) {
      bucket.retain(|_, mapped| mapped != id);
    }

    removed
  }

  /// Forget every loaded entity. The cache tier is left alone.
  pub fn clear(&self) {
    self
      .loaded_by_id
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
    self
      .id_by_unique_name
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }

  /// Save an entity and make the saved state the canonical instance.
  ///
  /// Any previously loaded instance with the same identity is evicted first,
  /// so holders of the old `Arc` keep the pre-save snapshot.
  pub async fn save(&self, mut entity: Entity) -> Result<Arc<Entity>> {
    self.api.save_entity(&mut entity).await?;

    let Some(id) = entity.id() else {
      return Err(Error::Remote(format!(
        "save of {} returned no id",
        entity.object_type()
      )));
    };

    self.evict(entity.object_type(), &id);
    self.cache.store(
      &CacheKey::entity(&self.application_id, entity.object_type(), &id),
      &Value::Object(self.codec().encode(&entity)),
      self.entity_ttl_millis,
    );
    Ok(self.register(entity))
  }

  /// Delete an entity remotely and forget it locally.
  pub async fn delete(&self, entity: &Entity) -> Result<bool> {
    let removed = self.api.delete_entity(entity).await?;

    if let Some(id) = entity.id() {
      self.evict(entity.object_type(), &id);
      // Tombstone so the tier cannot resurrect it before its TTL runs out
      self.cache.store(
        &CacheKey::entity(&self.application_id, entity.object_type(), &id),
        &Value::Null,
        self.entity_ttl_millis,
      );
    }
    Ok(removed)
  }

  fn from_tier(&self, key: &CacheKey) -> Option<Entity> {
    match self.cache.lookup(key)? {
      Value::Null => None,
      cached => match self.codec().decode_value(&cached) {
        Ok(entity) => Some(entity),
        Err(e) => {
          warn!(key = %key.description(), error = %e, "ignoring undecodable cache entry");
          None
        }
      },
    }
  }

  fn id_for_unique_name(&self, object_type: &str, unique_name: &str) -> Option<String> {
    let names = self
      .id_by_unique_name
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    names.get(object_type)?.get(unique_name).cloned()
  }

  fn remember_unique_name(&self, object_type: &str, unique_name: &str, id: &str) {
    let mut names = self
      .id_by_unique_name
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    names
      .entry(object_type.to_string())
      .or_default()
      .insert(unique_name.to_string(), id.to_string());
  }

  async fn begin_flight(&self, key: String) -> Flight {
    let lock = {
      let mut locks = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
      // Entries only the map still holds were left by waiters dropped before
      // they got the lock
      locks.retain(|_, lock| Arc::strong_count(lock) > 1);
      locks.entry(key.clone()).or_default().clone()
    };
    let guard = lock.lock_owned().await;
    Flight {
      key,
      locks: self.flights.clone(),
      guard: Some(guard),
    }
  }
}

impl std::fmt::Debug for EntityResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntityResolver")
      .field("application_id", &self.application_id)
      .field("entity_ttl_millis", &self.entity_ttl_millis)
      .field("cache", &self.cache)
      .field("loaded", &self.loaded_count())
      .finish()
  }
}

fn trace_source(object_type: &str, id: &str, source: CacheSource) {
  debug!(object_type, id, ?source, "resolved entity");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheTier, MemoryCache};
  use crate::remote::transport::mock::MockTransport;
  use serde_json::json;
  use std::time::Duration;

  fn task_responder(req: &crate::remote::Request) -> Result<Value> {
    match req.payload.get("uname") {
      Some(uname) => Ok(json!({"obj_type": "cms_page", "id": "7", "uname": uname, "name": "Home"})),
      None => Ok(json!({
        "obj_type": req.payload["obj_type"],
        "id": req.payload["id"],
        "name": "Write docs",
      })),
    }
  }

  fn resolver_with(transport: Arc<MockTransport>, cache: CacheLayer) -> EntityResolver {
    let api = EntityApi::new(transport, SchemaCodec::default());
    EntityResolver::new(api, cache, "app")
  }

  fn resolver(transport: Arc<MockTransport>) -> EntityResolver {
    resolver_with(transport, CacheLayer::disabled())
  }

  struct BrokenTier;

  impl CacheTier for BrokenTier {
    fn set(&self, _key: &str, _value: &Value, _ttl_millis: u64) -> bool {
      false
    }

    fn get(&self, _key: &str) -> Option<Value> {
      None
    }

    fn name(&self) -> &'static str {
      "broken"
    }
  }

  #[tokio::test]
  async fn test_same_id_yields_same_instance() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let resolver = resolver(transport.clone());

    let first = resolver.get_by_id("task", "42").await.unwrap().unwrap();
    let second = resolver.get_by_id("task", "42").await.unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.requests()[0].cache_ttl_millis, 0);
  }

  #[tokio::test]
  async fn test_tier_serves_after_identity_map_is_cleared() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let tier = Arc::new(MemoryCache::new());
    let resolver = resolver_with(transport.clone(), CacheLayer::new(tier.clone()));

    resolver.get_by_id("task", "42").await.unwrap().unwrap();
    assert_eq!(transport.calls(), 1);
    assert!(tier.get("app-task-42").is_some());

    resolver.clear();
    let task = resolver.get_by_id("task", "42").await.unwrap().unwrap();

    assert_eq!(task.display_name().as_deref(), Some("Write docs"));
    assert_eq!(transport.calls(), 1);
    assert_eq!(resolver.loaded_count(), 1);
  }

  #[tokio::test]
  async fn test_not_found_is_none_and_not_tracked() {
    let transport = Arc::new(MockTransport::new(|_| Ok(Value::Null)));
    let resolver = resolver(transport);

    assert!(resolver.get_by_id("task", "404").await.unwrap().is_none());
    assert_eq!(resolver.loaded_count(), 0);
  }

  #[tokio::test]
  async fn test_error_payload_is_remote_error() {
    let transport = Arc::new(MockTransport::new(|_| Ok(json!({"error": "denied"}))));
    let err = resolver(transport).get_by_id("task", "42").await.unwrap_err();
    assert!(matches!(err, Error::Remote(m) if m.contains("denied")));
  }

  #[tokio::test]
  async fn test_missing_identity_is_schema_error() {
    let transport = Arc::new(MockTransport::new(|_| Ok(json!({"name": "orphan"}))));
    let err = resolver(transport).get_by_id("task", "42").await.unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
  }

  #[tokio::test]
  async fn test_failed_tier_writes_do_not_abort_lookup() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let resolver = resolver_with(transport, CacheLayer::new(Arc::new(BrokenTier)));

    let task = resolver.get_by_id("task", "42").await.unwrap();
    assert!(task.is_some());
  }

  #[tokio::test]
  async fn test_unique_name_and_id_share_instance() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let resolver = resolver(transport.clone());
    let namespace = NamespaceConditions::new();

    let by_name = resolver
      .get_by_unique_name("cms_page", "home", &namespace)
      .await
      .unwrap()
      .unwrap();
    let by_id = resolver.get_by_id("cms_page", "7").await.unwrap().unwrap();
    let again = resolver
      .get_by_unique_name("cms_page", "home", &namespace)
      .await
      .unwrap()
      .unwrap();

    assert!(Arc::ptr_eq(&by_name, &by_id));
    assert!(Arc::ptr_eq(&by_name, &again));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_unique_name_uses_tier_mapping() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let tier: Arc<dyn CacheTier> = Arc::new(MemoryCache::new());
    let resolver = resolver_with(transport.clone(), CacheLayer::new(tier));
    let namespace = NamespaceConditions::new();

    resolver
      .get_by_unique_name("cms_page", "home", &namespace)
      .await
      .unwrap();
    resolver.clear();
    let page = resolver
      .get_by_unique_name("cms_page", "home", &namespace)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(page.id().as_deref(), Some("7"));
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_misses_fetch_once() {
    let transport =
      Arc::new(MockTransport::new(task_responder).with_delay(Duration::from_millis(50)));
    let resolver = resolver(transport.clone());

    let (a, b) = tokio::join!(
      resolver.get_by_id("task", "42"),
      resolver.get_by_id("task", "42")
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(transport.calls(), 1);
    assert!(resolver.flights.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_unique_name_misses_fetch_once() {
    let transport =
      Arc::new(MockTransport::new(task_responder).with_delay(Duration::from_millis(50)));
    let resolver = resolver(transport.clone());
    let namespace = NamespaceConditions::new();

    let (a, b) = tokio::join!(
      resolver.get_by_unique_name("cms_page", "home", &namespace),
      resolver.get_by_unique_name("cms_page", "home", &namespace)
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(transport.calls(), 1);
    assert!(resolver.flights.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_abandoned_lookup_leaves_resolver_usable() {
    let transport =
      Arc::new(MockTransport::new(task_responder).with_delay(Duration::from_millis(100)));
    let resolver = resolver(transport.clone());

    let abandoned =
      tokio::time::timeout(Duration::from_millis(10), resolver.get_by_id("task", "42")).await;
    assert!(abandoned.is_err());
    assert!(resolver.loaded("task", "42").is_none());
    assert!(resolver.flights.lock().unwrap().is_empty());

    let first = resolver.get_by_id("task", "42").await.unwrap().unwrap();
    let second = resolver.get_by_id("task", "42").await.unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.display_name().as_deref(), Some("Write docs"));
    assert_eq!(transport.calls(), 2);
    assert_eq!(resolver.loaded_count(), 1);
    assert!(resolver.flights.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_orphaned_flight_entries_are_pruned() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let resolver = resolver(transport);
    resolver
      .flights
      .lock()
      .unwrap()
      .insert("id:task:gone".to_string(), Arc::default());

    resolver.get_by_id("task", "42").await.unwrap();

    assert!(resolver.flights.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_register_keeps_first_instance() {
    let resolver = resolver(Arc::new(MockTransport::new(task_responder)));

    let mut original = Entity::new("task");
    original.set("id", "1");
    original.set("name", "first");
    let mut duplicate = Entity::new("task");
    duplicate.set("id", "1");
    duplicate.set("name", "second");

    let first = resolver.register(original);
    let second = resolver.register(duplicate);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.display_name().as_deref(), Some("first"));
  }

  #[tokio::test]
  async fn test_save_replaces_canonical_instance() {
    let transport = Arc::new(MockTransport::new(|req| {
      let mut data = req.payload.clone();
      if req.action == "save" {
        data["id"] = json!("99");
      }
      Ok(data)
    }));
    let resolver = resolver(transport);

    let mut task = Entity::new("task");
    task.set("name", "draft");
    let saved = resolver.save(task).await.unwrap();

    assert_eq!(saved.id().as_deref(), Some("99"));
    assert!(Arc::ptr_eq(&saved, &resolver.loaded("task", "99").unwrap()));
  }

  #[tokio::test]
  async fn test_delete_evicts_and_tombstones() {
    let transport = Arc::new(MockTransport::new(|req| match req.action.as_str() {
      "remove" => Ok(json!(["42"])),
      _ => task_responder(req),
    }));
    let tier = Arc::new(MemoryCache::new());
    let resolver = resolver_with(transport.clone(), CacheLayer::new(tier.clone()));

    let task = resolver.get_by_id("task", "42").await.unwrap().unwrap();
    assert!(resolver.delete(&task).await.unwrap());

    assert!(resolver.loaded("task", "42").is_none());
    assert_eq!(tier.get("app-task-42"), Some(Value::Null));

    resolver.get_by_id("task", "42").await.unwrap();
    assert_eq!(transport.calls(), 3);
  }

  #[tokio::test]
  async fn test_delete_without_id_is_invalid() {
    let transport = Arc::new(MockTransport::new(task_responder));
    let err = resolver(transport.clone())
      .delete(&Entity::new("task"))
      .await
      .unwrap_err();

    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(transport.calls(), 0);
  }
}
