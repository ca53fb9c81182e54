//! Serde-deserializable types matching the server's JSON responses.
//!
//! Entity payloads stay as raw JSON objects; they go through the schema codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::WireObject;
use crate::error::{Error, Result};

// ============================================================================
// Query endpoint response
// ============================================================================

/// One page of results from `entity-query/execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiQueryResponse {
  #[serde(default)]
  pub total_num: usize,
  #[serde(default)]
  pub num: usize,
  #[serde(default)]
  pub entities: Vec<Value>,
}

// ============================================================================
// Groupings endpoint response
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiGroupingsResponse {
  #[serde(default)]
  pub groups: Value,
}

// ============================================================================
// Authentication endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAuthResponse {
  #[serde(default)]
  pub result: String,
  pub session_token: Option<String>,
  pub reason: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Error message carried by an error-shaped payload, if any.
pub fn error_message(value: &Value) -> Option<String> {
  match value.get("error")? {
    Value::String(s) => Some(s.clone()),
    Value::Null => None,
    other => Some(other.to_string()),
  }
}

/// Interpret an entity fetch response.
///
/// - `{error}` is a remote error
/// - null, `{}` or `[]` means no matching record
/// - anything else must be an identified wire object
pub fn entity_response(value: Value) -> Result<Option<WireObject>> {
  if let Some(message) = error_message(&value) {
    return Err(Error::Remote(format!("error getting entity: {}", message)));
  }

  match value {
    Value::Null => Ok(None),
    Value::Array(items) if items.is_empty() => Ok(None),
    Value::Object(obj) if obj.is_empty() => Ok(None),
    Value::Object(obj) => {
      if obj.contains_key("obj_type") && obj.contains_key("id") {
        Ok(Some(obj))
      } else {
        Err(Error::Schema(
          "entity response is missing obj_type or id".to_string(),
        ))
      }
    }
    other => Err(Error::Schema(format!(
      "unexpected entity response: {}",
      other
    ))),
  }
}
