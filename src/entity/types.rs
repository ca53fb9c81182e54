//! Dynamically-typed entity records and their field values.

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use crate::error::{Error, Result};

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Pointer to another entity or to a grouping term.
///
/// Two references are equal when their ids match, whatever the cached display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
  id: String,
  #[serde(rename = "name", alias = "displayName", default)]
  display_name: String,
}

impl Reference {
  pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      display_name: display_name.into(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn display_name(&self) -> &str {
    &self.display_name
  }
}

impl PartialEq for Reference {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for Reference {}

impl Hash for Reference {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

/// A single non-reference value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  DateTime(DateTime<FixedOffset>),
  /// Nested wire data that is neither a reference nor a flat list
  Json(serde_json::Value),
}

impl Scalar {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Scalar::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Scalar::Int(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Scalar::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Scalar::Null)
  }
}

/// Value held by one entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Scalar(Scalar),
  Reference(Reference),
  ReferenceList(Vec<Reference>),
  List(Vec<Scalar>),
}

impl FieldValue {
  fn kind(&self) -> &'static str {
    match self {
      FieldValue::Scalar(_) => "scalar",
      FieldValue::Reference(_) => "reference",
      FieldValue::ReferenceList(_) => "reference list",
      FieldValue::List(_) => "list",
    }
  }
}

macro_rules! scalar_from {
  ($($ty:ty => $variant:ident),* $(,)?) => {
    $(
      impl From<$ty> for Scalar {
        fn from(v: $ty) -> Self {
          Scalar::$variant(v.into())
        }
      }

      impl From<$ty> for FieldValue {
        fn from(v: $ty) -> Self {
          FieldValue::Scalar(Scalar::from(v))
        }
      }
    )*
  };
}

scalar_from! {
  bool => Bool,
  i32 => Int,
  i64 => Int,
  f64 => Float,
  String => Text,
  &str => Text,
  DateTime<FixedOffset> => DateTime,
}

impl From<DateTime<Utc>> for FieldValue {
  fn from(v: DateTime<Utc>) -> Self {
    FieldValue::Scalar(Scalar::DateTime(v.fixed_offset()))
  }
}

impl From<Scalar> for FieldValue {
  fn from(v: Scalar) -> Self {
    FieldValue::Scalar(v)
  }
}

impl From<Reference> for FieldValue {
  fn from(v: Reference) -> Self {
    FieldValue::Reference(v)
  }
}

impl From<Vec<Reference>> for FieldValue {
  fn from(v: Vec<Reference>) -> Self {
    FieldValue::ReferenceList(v)
  }
}

impl From<Vec<Scalar>> for FieldValue {
  fn from(v: Vec<Scalar>) -> Self {
    FieldValue::List(v)
  }
}

/// Per-type presentation hints attached by the entity factory.
#[derive(Debug, Clone, Copy)]
pub struct TypeProfile {
  /// Fields consulted, in order, for a display name
  pub name_fields: &'static [&'static str],
  /// Fields consulted, in order, for a teaser
  pub teaser_fields: &'static [&'static str],
}

impl TypeProfile {
  pub const DEFAULT: TypeProfile = TypeProfile {
    name_fields: &["name", "title", "subject"],
    teaser_fields: &["data", "description", "body", "notes"],
  };
}

impl Default for TypeProfile {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// One remote object instance: an object type plus an open set of fields.
#[derive(Debug, Clone)]
pub struct Entity {
  object_type: String,
  fields: BTreeMap<String, FieldValue>,
  profile: TypeProfile,
}

impl Entity {
  pub fn new(object_type: impl Into<String>) -> Self {
    Self {
      object_type: object_type.into(),
      fields: BTreeMap::new(),
      profile: TypeProfile::DEFAULT,
    }
  }

  pub fn with_profile(mut self, profile: TypeProfile) -> Self {
    self.profile = profile;
    self
  }

  pub fn object_type(&self) -> &str {
    &self.object_type
  }

  /// The remote id, if the entity has been persisted.
  pub fn id(&self) -> Option<String> {
    match self.fields.get("id")? {
      FieldValue::Scalar(Scalar::Text(s)) if !s.is_empty() => Some(s.clone()),
      FieldValue::Scalar(Scalar::Int(n)) => Some(n.to_string()),
      _ => None,
    }
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
    self.fields.insert(name.into(), value.into())
  }

  /// Read a field. `None` means the field was never loaded, which is distinct
  /// from a loaded null (`Some(FieldValue::Scalar(Scalar::Null))`).
  pub fn get(&self, name: &str) -> Option<&FieldValue> {
    self.fields.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.fields.contains_key(name)
  }

  pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
    self.fields.remove(name)
  }

  pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn scalar(&self, name: &str) -> Result<Option<&Scalar>> {
    match self.fields.get(name) {
      None => Ok(None),
      Some(FieldValue::Scalar(s)) => Ok(Some(s)),
      Some(other) => Err(self.kind_mismatch(name, "scalar", other)),
    }
  }

  pub fn reference(&self, name: &str) -> Result<Option<&Reference>> {
    match self.fields.get(name) {
      None => Ok(None),
      Some(FieldValue::Reference(r)) => Ok(Some(r)),
      Some(other) => Err(self.kind_mismatch(name, "reference", other)),
    }
  }

  pub fn reference_list(&self, name: &str) -> Result<Option<&[Reference]>> {
    match self.fields.get(name) {
      None => Ok(None),
      Some(FieldValue::ReferenceList(refs)) => Ok(Some(refs)),
      Some(other) => Err(self.kind_mismatch(name, "reference list", other)),
    }
  }

  pub fn list(&self, name: &str) -> Result<Option<&[Scalar]>> {
    match self.fields.get(name) {
      None => Ok(None),
      Some(FieldValue::List(items)) => Ok(Some(items)),
      Some(other) => Err(self.kind_mismatch(name, "list", other)),
    }
  }

  fn kind_mismatch(&self, name: &str, wanted: &str, found: &FieldValue) -> Error {
    Error::Schema(format!(
      "field {}.{} is a {}, not a {}",
      self.object_type,
      name,
      found.kind(),
      wanted
    ))
  }

  fn text_field(&self, name: &str) -> Option<&str> {
    match self.fields.get(name) {
      Some(FieldValue::Scalar(Scalar::Text(s))) if !s.is_empty() => Some(s),
      _ => None,
    }
  }

  /// Human readable name from the first populated name field, falling back to the id.
  pub fn display_name(&self) -> Option<String> {
    self
      .profile
      .name_fields
      .iter()
      .find_map(|f| self.text_field(f))
      .map(String::from)
      .or_else(|| self.id())
  }

  /// Short plain-text excerpt of at most `words` words.
  pub fn teaser(&self, words: usize) -> String {
    let Some(text) = self
      .profile
      .teaser_fields
      .iter()
      .find_map(|f| self.text_field(f))
    else {
      return String::new();
    };

    TAGS
      .replace_all(text, " ")
      .split_whitespace()
      .take(words)
      .collect::<Vec<_>>()
      .join(" ")
  }
}

impl PartialEq for Entity {
  fn eq(&self, other: &Self) -> bool {
    self.object_type == other.object_type && self.fields == other.fields
  }
}
