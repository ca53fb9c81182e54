//! Hierarchical grouping terms (categories, statuses, user groups...).

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One node of a grouping tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
  pub id: String,
  pub title: String,
  pub is_hierarchical: bool,
  pub parent_id: Option<String>,
  pub sort_order: i64,
  pub children: Vec<Grouping>,
  /// Wire keys without a dedicated field, passed through untouched
  pub extra: BTreeMap<String, Value>,
}

impl Grouping {
  /// Export this node (and its children) back to the wire shape.
  pub fn to_wire(&self) -> Value {
    let mut out: Map<String, Value> = self
      .extra
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    out.insert("id".into(), Value::String(self.id.clone()));
    out.insert("title".into(), Value::String(self.title.clone()));
    out.insert("heiarch".into(), Value::Bool(self.is_hierarchical));
    out.insert(
      "parent_id".into(),
      self.parent_id.clone().map_or(Value::Null, Value::String),
    );
    out.insert("sort_order".into(), Value::from(self.sort_order));
    if !self.children.is_empty() {
      out.insert(
        "children".into(),
        Value::Array(self.children.iter().map(Grouping::to_wire).collect()),
      );
    }
    Value::Object(out)
  }

  /// Depth-first search for a node by id.
  pub fn find(&self, id: &str) -> Option<&Grouping> {
    if self.id == id {
      return Some(self);
    }
    self.children.iter().find_map(|c| c.find(id))
  }
}

/// Build grouping trees from a wire list.
///
/// Lookups are best-effort: an error payload, a non-list or an empty input all
/// produce an empty list.
pub fn parse_groupings(data: &Value) -> Vec<Grouping> {
  let Some(items) = data.as_array() else {
    return Vec::new();
  };

  items
    .iter()
    .filter_map(Value::as_object)
    .filter(|obj| !obj.contains_key("error"))
    .map(parse_node)
    .collect()
}

fn parse_node(obj: &Map<String, Value>) -> Grouping {
  let mut grouping = Grouping::default();

  for (name, value) in obj {
    match name.as_str() {
      "id" => grouping.id = text(value).unwrap_or_default(),
      "title" => grouping.title = text(value).unwrap_or_default(),
      "heiarch" => grouping.is_hierarchical = truthy(value),
      "parent_id" => grouping.parent_id = text(value),
      "sort_order" => grouping.sort_order = integer(value),
      "children" => grouping.children = parse_groupings(value),
      _ => {
        grouping.extra.insert(name.clone(), value.clone());
      }
    }
  }

  grouping
}

fn text(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

fn truthy(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => matches!(s.as_str(), "t" | "true" | "1"),
    _ => false,
  }
}

fn integer(value: &Value) -> i64 {
  match value {
    Value::Number(n) => n.as_i64().unwrap_or_default(),
    Value::String(s) => s.trim().parse().unwrap_or_default(),
    _ => 0,
  }
}
