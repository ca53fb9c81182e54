//! Mapping between entities and the JSON wire representation.
//!
//! Reference fields travel with a side channel next to the id value:
//! - `field_fkey` holds the display name of a single reference
//! - `field_fval` holds `{id: name}` pairs (or an array of `{id, name}` objects)
//!   for multi-valued references
//!
//! Date-time scalars use the `YYYY-MM-DD HH:MM:SS Z` text form, where `Z` is the
//! UTC offset in seconds.
//!
//! The wire carries no type tags, so any string in exactly that form decodes as
//! a date-time. A text scalar that happens to look like one does not survive a
//! round trip as text.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use regex::Regex;
use serde_json::{json, Map, Number, Value};
use std::sync::{Arc, LazyLock};

use super::factory::EntityFactory;
use super::types::{Entity, FieldValue, Reference, Scalar};
use crate::error::{Error, Result};

/// A decoded JSON object as exchanged with the server.
pub type WireObject = Map<String, Value>;

/// Wire schema version produced and understood by [`SchemaCodec`].
pub const SCHEMA_VERSION: u32 = 1;

const FVAL_SUFFIX: &str = "_fval";
const FKEY_SUFFIX: &str = "_fkey";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static WIRE_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) (-?\d{1,5})$").expect("valid datetime regex")
});

/// Encodes and decodes entities, building new ones through the factory registry.
#[derive(Debug, Clone)]
pub struct SchemaCodec {
  factory: Arc<EntityFactory>,
}

impl Default for SchemaCodec {
  fn default() -> Self {
    Self::new(Arc::new(EntityFactory::with_builtin_types()))
  }
}

impl SchemaCodec {
  pub fn new(factory: Arc<EntityFactory>) -> Self {
    Self { factory }
  }

  pub fn version(&self) -> u32 {
    SCHEMA_VERSION
  }

  pub fn factory(&self) -> &EntityFactory {
    &self.factory
  }

  pub fn encode(&self, entity: &Entity) -> WireObject {
    let mut out = Map::new();
    out.insert("obj_type".into(), Value::String(entity.object_type().into()));

    for (name, value) in entity.fields() {
      match value {
        FieldValue::Scalar(s) => {
          out.insert(name.into(), scalar_to_wire(s));
        }
        FieldValue::Reference(r) => {
          out.insert(name.into(), Value::String(r.id().into()));
          out.insert(
            format!("{name}{FKEY_SUFFIX}"),
            Value::String(r.display_name().into()),
          );
        }
        FieldValue::ReferenceList(refs) => {
          let ids = refs.iter().map(|r| Value::String(r.id().into())).collect();
          let pairs = refs
            .iter()
            .map(|r| json!({ "id": r.id(), "name": r.display_name() }))
            .collect();
          out.insert(name.into(), Value::Array(ids));
          out.insert(format!("{name}{FVAL_SUFFIX}"), Value::Array(pairs));
        }
        FieldValue::List(items) => {
          out.insert(
            name.into(),
            Value::Array(items.iter().map(scalar_to_wire).collect()),
          );
        }
      }
    }

    out
  }

  /// Build a new entity from a wire object.
  ///
  /// Fails with [`Error::Schema`] when `obj_type` or `id` is missing.
  pub fn decode(&self, data: &WireObject) -> Result<Entity> {
    let object_type = data
      .get("obj_type")
      .and_then(Value::as_str)
      .filter(|t| !t.is_empty())
      .ok_or_else(|| Error::Schema("wire object has no obj_type".into()))?;

    if !has_id(data) {
      return Err(Error::Schema(format!(
        "wire object of type {} has no id",
        object_type
      )));
    }

    let mut entity = self.factory.create(object_type);
    self.apply(&mut entity, data);
    Ok(entity)
  }

  /// Like [`SchemaCodec::decode`] but accepts any JSON value.
  pub fn decode_value(&self, data: &Value) -> Result<Entity> {
    match data.as_object() {
      Some(obj) => self.decode(obj),
      None => Err(Error::Schema(format!("expected a wire object, got {}", data))),
    }
  }

  /// Overwrite an existing entity's fields from a wire object.
  pub fn apply(&self, entity: &mut Entity, data: &WireObject) {
    for (name, value) in data {
      if name == "obj_type" || name.ends_with(FVAL_SUFFIX) {
        continue;
      }
      if let Some(base) = name.strip_suffix(FKEY_SUFFIX) {
        if data.contains_key(base) {
          continue;
        }
      }
      entity.set(name.clone(), decode_field(name, value, data));
    }
  }
}

fn has_id(data: &WireObject) -> bool {
  match data.get("id") {
    None | Some(Value::Null) => false,
    Some(Value::String(s)) => !s.is_empty(),
    Some(_) => true,
  }
}

fn decode_field(name: &str, value: &Value, data: &WireObject) -> FieldValue {
  let fval = data
    .get(&format!("{name}{FVAL_SUFFIX}"))
    .filter(|v| !v.is_null());
  if let Some(fval) = fval {
    let refs = references_from_fval(fval);
    if value.is_array() {
      return FieldValue::ReferenceList(refs);
    }
    if let Some(first) = refs.into_iter().next() {
      return FieldValue::Reference(first);
    }
  }

  let fkey = data
    .get(&format!("{name}{FKEY_SUFFIX}"))
    .filter(|v| !v.is_null());
  if let Some(fkey) = fkey {
    if value.is_string() || value.is_number() {
      return FieldValue::Reference(Reference::new(id_string(value), id_string(fkey)));
    }
  }

  match value {
    Value::Array(items) => FieldValue::List(items.iter().map(wire_to_scalar).collect()),
    other => FieldValue::Scalar(wire_to_scalar(other)),
  }
}

/// Read references from a `_fval` value in any of its accepted shapes.
fn references_from_fval(fval: &Value) -> Vec<Reference> {
  match fval {
    Value::Object(obj) => match pair_from_object(obj) {
      Some(r) => vec![r],
      None => obj
        .iter()
        .map(|(id, name)| Reference::new(id.clone(), id_string(name)))
        .collect(),
    },
    Value::Array(items) => items
      .iter()
      .filter_map(|item| match item {
        Value::Object(obj) => pair_from_object(obj).or_else(|| {
          obj
            .iter()
            .next()
            .map(|(id, name)| Reference::new(id.clone(), id_string(name)))
        }),
        Value::Null => None,
        scalar => Some(Reference::new(id_string(scalar), "")),
      })
      .collect(),
    _ => Vec::new(),
  }
}

/// An explicit `{id, name}` pair, as opposed to an `{id: name}` map.
fn pair_from_object(obj: &Map<String, Value>) -> Option<Reference> {
  let id = obj.get("id")?;
  let name = obj.get("name").or_else(|| obj.get("displayName"))?;
  Some(Reference::new(id_string(id), id_string(name)))
}

fn id_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

fn scalar_to_wire(scalar: &Scalar) -> Value {
  match scalar {
    Scalar::Null => Value::Null,
    Scalar::Bool(b) => Value::Bool(*b),
    Scalar::Int(n) => Value::Number((*n).into()),
    Scalar::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
    Scalar::Text(s) => Value::String(s.clone()),
    Scalar::DateTime(dt) => Value::String(format_datetime(dt)),
    Scalar::Json(v) => v.clone(),
  }
}

fn wire_to_scalar(value: &Value) -> Scalar {
  match value {
    Value::Null => Scalar::Null,
    Value::Bool(b) => Scalar::Bool(*b),
    Value::Number(n) => match n.as_i64() {
      Some(i) => Scalar::Int(i),
      None => Scalar::Float(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => match parse_datetime(s) {
      Some(dt) => Scalar::DateTime(dt),
      None => Scalar::Text(s.clone()),
    },
    other => Scalar::Json(other.clone()),
  }
}

pub fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
  format!(
    "{} {}",
    dt.format(DATETIME_FORMAT),
    dt.offset().local_minus_utc()
  )
}

pub fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
  let caps = WIRE_DATETIME.captures(s)?;
  let naive = NaiveDateTime::parse_from_str(&caps[1], DATETIME_FORMAT).ok()?;
  let offset = FixedOffset::east_opt(caps[2].parse().ok()?)?;
  naive.and_local_timezone(offset).single()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn codec() -> SchemaCodec {
    SchemaCodec::default()
  }

  fn wire(value: Value) -> WireObject {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn test_encode_reference_fields() {
    let mut task = Entity::new("task");
    task.set("id", "42");
    task.set("owner", Reference::new("123", "Test User"));
    task.set(
      "groups",
      vec![Reference::new("1", "Group 1"), Reference::new("2", "Group 2")],
    );

    let data = codec().encode(&task);
    assert_eq!(data["obj_type"], json!("task"));
    assert_eq!(data["owner"], json!("123"));
    assert_eq!(data["owner_fkey"], json!("Test User"));
    assert_eq!(data["groups"], json!(["1", "2"]));
    assert_eq!(
      data["groups_fval"],
      json!([{"id": "1", "name": "Group 1"}, {"id": "2", "name": "Group 2"}])
    );
  }

  #[test]
  fn test_round_trip() {
    let offset = FixedOffset::east_opt(3600).unwrap();
    let mut task = Entity::new("task");
    task.set("id", "42");
    task.set("name", "Write docs");
    task.set("done", false);
    task.set("cost", 12.5);
    task.set("estimate", 3);
    task.set("notes", Scalar::Null);
    task.set("ts_due", offset.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap());
    task.set("status", Reference::new("2", "Active"));
    task.set(
      "groups",
      vec![Reference::new("1", "Group 1"), Reference::new("2", "Group 2")],
    );
    task.set("followers", Vec::<Reference>::new());
    task.set("tags", vec![Scalar::from("a"), Scalar::from("b")]);

    let codec = codec();
    let decoded = codec.decode(&codec.encode(&task)).unwrap();
    assert_eq!(decoded, task);
    assert_eq!(
      decoded.reference("status").unwrap().unwrap().display_name(),
      "Active"
    );
    assert_eq!(decoded.reference_list("groups").unwrap().unwrap().len(), 2);
  }

  #[test]
  fn test_decode_server_fval_map() {
    let data = wire(json!({
      "obj_type": "task",
      "id": 42,
      "owner_id": "123",
      "owner_id_fval": {"123": "Test User"},
      "groups": ["1", "2"],
      "groups_fval": {"1": "Group 1", "2": "Group 2"},
    }));

    let task = codec().decode(&data).unwrap();
    assert_eq!(task.id().as_deref(), Some("42"));
    assert!(!task.contains("groups_fval"));
    assert!(!task.contains("obj_type"));

    let owner = task.reference("owner_id").unwrap().unwrap();
    assert_eq!(owner.id(), "123");
    assert_eq!(owner.display_name(), "Test User");

    let groups = task.reference_list("groups").unwrap().unwrap();
    assert_eq!(groups[1].display_name(), "Group 2");
  }

  #[test]
  fn test_decode_null_reference_stays_scalar() {
    let data = wire(json!({
      "obj_type": "task",
      "id": "1",
      "owner_id": null,
      "owner_id_fval": null,
    }));

    let task = codec().decode(&data).unwrap();
    assert_eq!(task.scalar("owner_id").unwrap(), Some(&Scalar::Null));
  }

  #[test]
  fn test_decode_requires_identity() {
    let missing_id = wire(json!({"obj_type": "task", "name": "x"}));
    assert!(matches!(codec().decode(&missing_id), Err(Error::Schema(_))));

    let missing_type = wire(json!({"id": "1"}));
    assert!(matches!(codec().decode(&missing_type), Err(Error::Schema(_))));
  }

  #[test]
  fn test_decode_uses_factory() {
    let data = wire(json!({"obj_type": "content_feed_post", "id": "9", "data": "hello feed", "body": "other"}));
    let post = codec().decode(&data).unwrap();
    assert_eq!(post.teaser(25), "hello feed");
  }

  #[test]
  fn test_apply_overwrites_values() {
    let codec = codec();
    let mut task = Entity::new("task");
    task.set("name", "draft");

    codec.apply(&mut task, &wire(json!({"obj_type": "task", "id": "77", "name": "saved"})));
    assert_eq!(task.id().as_deref(), Some("77"));
    assert_eq!(task.scalar("name").unwrap().and_then(Scalar::as_str), Some("saved"));
  }

  #[test]
  fn test_datetime_shaped_text_decodes_as_datetime() {
    let mut post = Entity::new("task");
    post.set("id", "1");
    post.set("body", "2024-01-01 00:00:00 0");

    let codec = codec();
    let decoded = codec.decode(&codec.encode(&post)).unwrap();

    let utc = FixedOffset::east_opt(0).unwrap();
    assert_eq!(
      decoded.scalar("body").unwrap(),
      Some(&Scalar::DateTime(utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    );
    assert_eq!(decoded.scalar("body").unwrap().and_then(Scalar::as_str), None);
  }

  #[test]
  fn test_datetime_format() {
    let utc = FixedOffset::east_opt(0).unwrap();
    let dt = utc.with_ymd_and_hms(2016, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(format_datetime(&dt), "2016-01-02 03:04:05 0");
    assert_eq!(parse_datetime("2016-01-02 03:04:05 0"), Some(dt));
    assert_eq!(parse_datetime("2016-01-02"), None);
  }
}
