//! Cache key construction.

use md5::{Digest, Md5};
use serde_json::Value;

/// Keys for everything the client stores in a cache tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheKey {
  /// A single decoded entity
  Entity {
    application_id: String,
    object_type: String,
    id: String,
  },
  /// One page of query results, namespaced by object type so that identical
  /// filters on different types never share an entry
  Page {
    application_id: String,
    object_type: String,
    fingerprint: String,
  },
  /// Id behind a unique name, optionally scoped by namespace conditions
  UniqueName {
    application_id: String,
    object_type: String,
    unique_name: String,
    namespace: Value,
  },
  /// A raw remote call response
  Call {
    method: String,
    action: String,
    controller: String,
    payload: Value,
  },
}

impl CacheKey {
  pub fn entity(application_id: &str, object_type: &str, id: &str) -> Self {
    Self::Entity {
      application_id: application_id.into(),
      object_type: object_type.into(),
      id: id.into(),
    }
  }

  pub fn page(application_id: &str, object_type: &str, fingerprint: &str) -> Self {
    Self::Page {
      application_id: application_id.into(),
      object_type: object_type.into(),
      fingerprint: fingerprint.into(),
    }
  }

  pub fn unique_name(application_id: &str, object_type: &str, unique_name: &str, namespace: Value) -> Self {
    Self::UniqueName {
      application_id: application_id.into(),
      object_type: object_type.into(),
      unique_name: unique_name.into(),
      namespace,
    }
  }

  /// The string stored in the tier.
  pub fn render(&self) -> String {
    match self {
      Self::Entity {
        application_id,
        object_type,
        id,
      } => format!("{}-{}-{}", application_id, object_type, id),
      Self::Page {
        application_id,
        object_type,
        fingerprint,
      } => format!("{}-coll-{}-{}", application_id, object_type, fingerprint),
      Self::UniqueName {
        application_id,
        object_type,
        unique_name,
        namespace,
      } => match namespace {
        Value::Null => format!("{}-{}-uname-{}", application_id, object_type, unique_name),
        Value::Object(obj) if obj.is_empty() => {
          format!("{}-{}-uname-{}", application_id, object_type, unique_name)
        }
        ns => format!(
          "{}-{}-uname-{}-{}",
          application_id,
          object_type,
          unique_name,
          md5_hex(ns)
        ),
      },
      Self::Call {
        method,
        action,
        controller,
        payload,
      } => format!("{}-{}-{}{}", method, action, controller, md5_hex(payload)),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Entity { object_type, id, .. } => format!("{} {}", object_type, id),
      Self::Page {
        object_type,
        fingerprint,
        ..
      } => format!("{} page {}", object_type, fingerprint),
      Self::UniqueName {
        object_type,
        unique_name,
        ..
      } => format!("{} named {}", object_type, unique_name),
      Self::Call {
        method,
        controller,
        action,
        ..
      } => format!("{} {}/{}", method, controller, action),
    }
  }
}

fn md5_hex(value: &Value) -> String {
  let mut hasher = Md5::new();
  hasher.update(value.to_string().as_bytes());
  hex::encode(hasher.finalize())
}
