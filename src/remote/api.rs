//! Typed operations on top of a [`Transport`].

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::api_types::{entity_response, error_message, ApiGroupingsResponse, ApiQueryResponse};
use super::transport::{Request, Transport};
use crate::entity::{parse_groupings, Entity, Grouping, SchemaCodec, WireObject};
use crate::error::{Error, Result};
use crate::query::QuerySpec;

/// Default time a cacheable read may be served from the call cache.
pub const DEFAULT_CALL_TTL_MILLIS: u64 = 3000;

/// Extra conditions scoping a unique name, e.g. `{"parent_id": 12}`.
pub type NamespaceConditions = Map<String, Value>;

/// Remote entity operations: fetch, save, delete, groupings and queries.
#[derive(Clone)]
pub struct EntityApi {
  transport: Arc<dyn Transport>,
  codec: SchemaCodec,
  call_ttl_millis: u64,
}

impl EntityApi {
  pub fn new(transport: Arc<dyn Transport>, codec: SchemaCodec) -> Self {
    Self {
      transport,
      codec,
      call_ttl_millis: DEFAULT_CALL_TTL_MILLIS,
    }
  }

  /// Set how long cacheable reads may be served from the call cache.
  pub fn with_call_ttl(mut self, ttl_millis: u64) -> Self {
    self.call_ttl_millis = ttl_millis;
    self
  }

  pub fn codec(&self) -> &SchemaCodec {
    &self.codec
  }

  /// Fetch the raw wire object of an entity by id. `Ok(None)` when it does not exist.
  pub async fn fetch_entity(&self, object_type: &str, id: &str) -> Result<Option<WireObject>> {
    let request = by_id(object_type, id).cached_for(self.call_ttl_millis);
    entity_response(self.transport.call(request).await?)
  }

  /// Like [`Self::fetch_entity`] but never served from the call cache.
  ///
  /// Callers that keep their own entity cache use this so that a delete or save
  /// they performed is not masked by an older cached response.
  pub async fn fetch_entity_fresh(&self, object_type: &str, id: &str) -> Result<Option<WireObject>> {
    entity_response(self.transport.call(by_id(object_type, id)).await?)
  }

  /// Fetch the raw wire object of an entity by unique name.
  pub async fn fetch_entity_by_unique_name(
    &self,
    object_type: &str,
    unique_name: &str,
    namespace: &NamespaceConditions,
  ) -> Result<Option<WireObject>> {
    let request = by_unique_name(object_type, unique_name, namespace).cached_for(self.call_ttl_millis);
    entity_response(self.transport.call(request).await?)
  }

  /// Like [`Self::fetch_entity_by_unique_name`] but never served from the call cache.
  pub async fn fetch_entity_by_unique_name_fresh(
    &self,
    object_type: &str,
    unique_name: &str,
    namespace: &NamespaceConditions,
  ) -> Result<Option<WireObject>> {
    let request = by_unique_name(object_type, unique_name, namespace);
    entity_response(self.transport.call(request).await?)
  }

  pub async fn get_entity(&self, object_type: &str, id: &str) -> Result<Option<Entity>> {
    self
      .fetch_entity(object_type, id)
      .await?
      .map(|data| self.codec.decode(&data))
      .transpose()
  }

  pub async fn get_entity_by_unique_name(
    &self,
    object_type: &str,
    unique_name: &str,
    namespace: &NamespaceConditions,
  ) -> Result<Option<Entity>> {
    self
      .fetch_entity_by_unique_name(object_type, unique_name, namespace)
      .await?
      .map(|data| self.codec.decode(&data))
      .transpose()
  }

  /// Save a new or existing entity, then copy the server's values (id included)
  /// back into it.
  pub async fn save_entity(&self, entity: &mut Entity) -> Result<()> {
    let payload = Value::Object(self.codec.encode(entity));
    let response = self
      .transport
      .call(Request::post("entity", "save", payload))
      .await?;

    if let Some(message) = error_message(&response) {
      return Err(Error::Remote(format!("error saving entity: {}", message)));
    }

    match response {
      Value::Object(data) => {
        self.codec.apply(entity, &data);
        debug!(object_type = entity.object_type(), id = ?entity.id(), "saved entity");
        Ok(())
      }
      other => Err(Error::Remote(format!("unexpected save response: {}", other))),
    }
  }

  /// Delete an entity. Fails before any network call if it has no id.
  /// Returns whether the server reported a removal.
  pub async fn delete_entity(&self, entity: &Entity) -> Result<bool> {
    let id = entity.id().ok_or_else(|| {
      Error::InvalidOperation("cannot delete an entity that does not yet exist".into())
    })?;

    let response = self
      .transport
      .call(Request::post(
        "entity",
        "remove",
        json!({ "obj_type": entity.object_type(), "ids": id }),
      ))
      .await?;

    if let Some(message) = error_message(&response) {
      return Err(Error::Remote(format!("error deleting entity: {}", message)));
    }

    Ok(match response {
      Value::Array(items) => !items.is_empty(),
      Value::Object(obj) => !obj.is_empty(),
      _ => false,
    })
  }

  /// Grouping tree for a grouping field. Empty when either argument is empty or
  /// the server answers with an error payload.
  pub async fn get_groupings(&self, object_type: &str, field_name: &str) -> Result<Vec<Grouping>> {
    if object_type.is_empty() || field_name.is_empty() {
      return Ok(Vec::new());
    }

    let request = Request::get(
      "entity",
      "get-groupings",
      json!({ "obj_type": object_type, "field_name": field_name }),
    )
    .cached_for(self.call_ttl_millis);
    let response = self.transport.call(request).await?;

    let groups: ApiGroupingsResponse = serde_json::from_value(response).unwrap_or_default();
    Ok(parse_groupings(&groups.groups))
  }

  /// Run one page of a query.
  pub async fn execute_query(&self, spec: &QuerySpec) -> Result<ApiQueryResponse> {
    let request = Request::post("entity-query", "execute", spec.to_payload())
      .cached_for(self.call_ttl_millis);
    let response = self.transport.call(request).await?;

    if let Some(message) = error_message(&response) {
      return Err(Error::Remote(format!("error running query: {}", message)));
    }

    serde_json::from_value(response)
      .map_err(|e| Error::Schema(format!("invalid query response: {}", e)))
  }
}

fn by_id(object_type: &str, id: &str) -> Request {
  Request::get("entity", "get", json!({ "obj_type": object_type, "id": id }))
}

fn by_unique_name(object_type: &str, unique_name: &str, namespace: &NamespaceConditions) -> Request {
  Request::post(
    "entity",
    "get",
    json!({
      "obj_type": object_type,
      "uname": unique_name,
      "uname_conditions": namespace,
    }),
  )
}

impl std::fmt::Debug for EntityApi {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntityApi")
      .field("call_ttl_millis", &self.call_ttl_millis)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::transport::mock::MockTransport;
  use crate::remote::transport::Method;

  fn api(transport: Arc<MockTransport>) -> EntityApi {
    EntityApi::new(transport, SchemaCodec::default())
  }

  #[tokio::test]
  async fn test_get_entity_decodes() {
    let transport = Arc::new(MockTransport::new(|_| {
      Ok(json!({"obj_type": "task", "id": "42", "name": "x"}))
    }));
    let task = api(transport.clone()).get_entity("task", "42").await.unwrap().unwrap();

    assert_eq!(task.id().as_deref(), Some("42"));
    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.controller, "entity");
    assert_eq!(request.action, "get");
    assert_eq!(request.cache_ttl_millis, DEFAULT_CALL_TTL_MILLIS);
  }

  #[tokio::test]
  async fn test_fresh_fetches_skip_call_cache() {
    let transport = Arc::new(MockTransport::new(|_| Ok(Value::Null)));
    let api = api(transport.clone());

    api.fetch_entity_fresh("task", "42").await.unwrap();
    api
      .fetch_entity_by_unique_name_fresh("cms_page", "home", &NamespaceConditions::new())
      .await
      .unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].cache_ttl_millis, 0);
    assert_eq!(requests[0].payload["id"], json!("42"));
    assert_eq!(requests[1].cache_ttl_millis, 0);
    assert_eq!(requests[1].payload["uname"], json!("home"));
  }

  #[tokio::test]
  async fn test_unique_name_request_shape() {
    let transport = Arc::new(MockTransport::new(|_| Ok(Value::Null)));
    let mut namespace = NamespaceConditions::new();
    namespace.insert("parent_id".into(), json!(12));

    let found = api(transport.clone())
      .get_entity_by_unique_name("cms_page", "home", &namespace)
      .await
      .unwrap();

    assert!(found.is_none());
    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.payload["uname"], json!("home"));
    assert_eq!(request.payload["uname_conditions"]["parent_id"], json!(12));
  }

  #[tokio::test]
  async fn test_save_applies_server_values() {
    let transport = Arc::new(MockTransport::new(|req| {
      let mut data = req.payload.clone();
      data["id"] = json!("99");
      Ok(data)
    }));
    let mut task = Entity::new("task");
    task.set("name", "new task");

    api(transport).save_entity(&mut task).await.unwrap();
    assert_eq!(task.id().as_deref(), Some("99"));
  }

  #[tokio::test]
  async fn test_delete_without_id_fails_before_network() {
    let transport = Arc::new(MockTransport::new(|_| Ok(json!([1]))));
    let err = api(transport.clone())
      .delete_entity(&Entity::new("task"))
      .await
      .unwrap_err();

    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_delete_reports_removal() {
    let transport = Arc::new(MockTransport::new(|_| Ok(json!(["42"]))));
    let mut task = Entity::new("task");
    task.set("id", "42");

    assert!(api(transport.clone()).delete_entity(&task).await.unwrap());
    assert_eq!(transport.requests()[0].payload["ids"], json!("42"));
  }

  #[tokio::test]
  async fn test_groupings_are_best_effort() {
    let transport = Arc::new(MockTransport::new(|_| Ok(json!({"error": "no such field"}))));
    let api = api(transport.clone());

    assert!(api.get_groupings("user", "groups").await.unwrap().is_empty());
    assert!(api.get_groupings("", "groups").await.unwrap().is_empty());
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_groupings_parse_tree() {
    let transport = Arc::new(MockTransport::new(|_| {
      Ok(json!({"groups": [{"id": 1, "title": "Admins", "heiarch": false, "children": []}]}))
    }));
    let groups = api(transport).get_groupings("user", "groups").await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].title, "Admins");
  }

  #[tokio::test]
  async fn test_query_error_payload() {
    let transport = Arc::new(MockTransport::new(|_| Ok(json!({"error": "bad field"}))));
    let err = api(transport).execute_query(&QuerySpec::new("task")).await.unwrap_err();
    assert!(matches!(err, Error::Remote(m) if m.contains("bad field")));
  }
}
