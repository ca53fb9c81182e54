//! Registry mapping object types to entity constructors.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{Entity, TypeProfile};

type Constructor = Arc<dyn Fn() -> Entity + Send + Sync>;

/// Builds entities by object type.
///
/// Types without a registered constructor get a plain [`Entity`]. New types are
/// added with [`EntityFactory::register`] without touching the lookup.
#[derive(Clone, Default)]
pub struct EntityFactory {
  constructors: HashMap<String, Constructor>,
}

impl EntityFactory {
  /// An empty registry: every type builds a plain entity.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry preloaded with the object types that need special handling.
  pub fn with_builtin_types() -> Self {
    let mut factory = Self::new();
    factory.register_profile(
      "content_feed_post",
      TypeProfile {
        teaser_fields: &["data"],
        ..TypeProfile::DEFAULT
      },
    );
    factory
  }

  pub fn register<F>(&mut self, object_type: impl Into<String>, constructor: F)
  where
    F: Fn() -> Entity + Send + Sync + 'static,
  {
    self
      .constructors
      .insert(object_type.into(), Arc::new(constructor));
  }

  /// Register a type that only differs from the default by its presentation profile.
  pub fn register_profile(&mut self, object_type: &str, profile: TypeProfile) {
    let ty = object_type.to_string();
    self.register(object_type, move || {
      Entity::new(ty.clone()).with_profile(profile)
    });
  }

  pub fn create(&self, object_type: &str) -> Entity {
    match self.constructors.get(object_type) {
      Some(ctor) => {
        let entity = ctor();
        debug_assert_eq!(entity.object_type(), object_type);
        entity
      }
      None => Entity::new(object_type),
    }
  }

  pub fn is_registered(&self, object_type: &str) -> bool {
    self.constructors.contains_key(object_type)
  }
}

impl std::fmt::Debug for EntityFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntityFactory")
      .field("types", &self.constructors.keys().collect::<Vec<_>>())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unregistered_type_builds_plain_entity() {
    let factory = EntityFactory::with_builtin_types();
    let entity = factory.create("task");
    assert_eq!(entity.object_type(), "task");
    assert!(entity.is_empty());
  }

  #[test]
  fn test_content_feed_post_teaser_uses_data() {
    let factory = EntityFactory::with_builtin_types();
    let mut post = factory.create("content_feed_post");
    post.set("description", "ignored description");
    post.set("data", "<p>feed body text</p>");
    assert_eq!(post.teaser(2), "feed body");
  }

  #[test]
  fn test_register_custom_constructor() {
    let mut factory = EntityFactory::new();
    factory.register("customer", || {
      let mut e = Entity::new("customer");
      e.set("type_id", 1);
      e
    });

    assert!(factory.is_registered("customer"));
    let customer = factory.create("customer");
    assert!(customer.contains("type_id"));
  }
}
