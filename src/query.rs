//! Structured query descriptions: filter conditions, ordering and paging.
//!
//! # Example
//!
//! ```ignore
//! let mut spec = QuerySpec::new("task");
//! spec.and_where("name").equals("weekly report");
//! spec.or_where("owner_id").equals(123);
//! spec.order_by("ts_entered", Direction::Desc);
//! spec.set_limit(25);
//! ```

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Page size used when none is set.
pub const DEFAULT_LIMIT: usize = 100;

/// How a condition combines with the ones before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineLogic {
  #[default]
  And,
  Or,
}

/// Comparison applied by a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
  #[default]
  #[serde(rename = "is_equal")]
  EqualTo,
  #[serde(rename = "is_not_equal")]
  NotEqualTo,
  #[serde(rename = "is_less")]
  LessThan,
  #[serde(rename = "is_less_or_equal")]
  LessThanOrEqualTo,
  #[serde(rename = "is_greater")]
  GreaterThan,
  #[serde(rename = "is_greater_or_equal")]
  GreaterThanOrEqualTo,
  #[serde(rename = "contains")]
  Contains,
}

impl Operator {
  pub fn as_str(&self) -> &'static str {
    match self {
      Operator::EqualTo => "is_equal",
      Operator::NotEqualTo => "is_not_equal",
      Operator::LessThan => "is_less",
      Operator::LessThanOrEqualTo => "is_less_or_equal",
      Operator::GreaterThan => "is_greater",
      Operator::GreaterThanOrEqualTo => "is_greater_or_equal",
      Operator::Contains => "contains",
    }
  }
}

/// A single `where` clause. A field name of `*` means a full text match.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
  pub combine_logic: CombineLogic,
  pub field: String,
  pub operator: Operator,
  pub value: Value,
}

impl Condition {
  pub fn new(combine_logic: CombineLogic, field: impl Into<String>) -> Self {
    Self {
      combine_logic,
      field: field.into(),
      operator: Operator::EqualTo,
      value: Value::Null,
    }
  }

  fn set(&mut self, operator: Operator, value: impl Into<Value>) -> &mut Self {
    self.operator = operator;
    self.value = value.into();
    self
  }

  pub fn equals(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::EqualTo, value)
  }

  pub fn does_not_equal(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::NotEqualTo, value)
  }

  pub fn is_less_than(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::LessThan, value)
  }

  pub fn is_less_or_equal_to(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::LessThanOrEqualTo, value)
  }

  pub fn is_greater_than(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::GreaterThan, value)
  }

  pub fn is_greater_or_equal_to(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::GreaterThanOrEqualTo, value)
  }

  pub fn contains(&mut self, value: impl Into<Value>) -> &mut Self {
    self.set(Operator::Contains, value)
  }

  pub fn to_wire(&self) -> Value {
    json!({
      "blogic": self.combine_logic,
      "field_name": self.field,
      "operator": self.operator,
      "value": self.value,
    })
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
  pub field: String,
  pub direction: Direction,
}

impl OrderBy {
  pub fn to_wire(&self) -> Value {
    json!({
      "field_name": self.field,
      "direction": self.direction,
    })
  }
}

/// Filter, sort and paging for one object type.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
  object_type: String,
  conditions: Vec<Condition>,
  order_by: Vec<OrderBy>,
  offset: usize,
  limit: usize,
}

impl QuerySpec {
  pub fn new(object_type: impl Into<String>) -> Self {
    Self {
      object_type: object_type.into(),
      conditions: Vec::new(),
      order_by: Vec::new(),
      offset: 0,
      limit: DEFAULT_LIMIT,
    }
  }

  pub fn object_type(&self) -> &str {
    &self.object_type
  }

  /// Add a condition combined with AND.
  pub fn and_where(&mut self, field: impl Into<String>) -> &mut Condition {
    self.push(Condition::new(CombineLogic::And, field))
  }

  /// Add a condition combined with OR.
  pub fn or_where(&mut self, field: impl Into<String>) -> &mut Condition {
    self.push(Condition::new(CombineLogic::Or, field))
  }

  pub fn push(&mut self, condition: Condition) -> &mut Condition {
    self.conditions.push(condition);
    let last = self.conditions.len() - 1;
    &mut self.conditions[last]
  }

  pub fn conditions(&self) -> &[Condition] {
    &self.conditions
  }

  pub fn order_by(&mut self, field: impl Into<String>, direction: Direction) -> &mut Self {
    self.order_by.push(OrderBy {
      field: field.into(),
      direction,
    });
    self
  }

  pub fn orderings(&self) -> &[OrderBy] {
    &self.order_by
  }

  pub fn offset(&self) -> usize {
    self.offset
  }

  pub fn set_offset(&mut self, offset: usize) -> &mut Self {
    self.offset = offset;
    self
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  /// Set the page size. Zero is bumped to one so paging math stays defined.
  pub fn set_limit(&mut self, limit: usize) -> &mut Self {
    self.limit = limit.max(1);
    self
  }

  /// Stable hash of the conditions, ordering, offset and limit.
  ///
  /// The object type is not part of the fingerprint; cache keys built on it must
  /// be namespaced by type (see [`crate::cache::CacheKey::Page`]).
  pub fn fingerprint(&self) -> String {
    let mut hasher = Md5::new();
    for condition in &self.conditions {
      hasher.update(condition.to_wire().to_string().as_bytes());
    }
    for order in &self.order_by {
      hasher.update(order.to_wire().to_string().as_bytes());
    }
    hasher.update(format!("|{}|{}", self.offset, self.limit).as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Request body for the query endpoint.
  pub fn to_payload(&self) -> Value {
    json!({
      "obj_type": self.object_type,
      "offset": self.offset,
      "limit": self.limit,
      "conditions": self.conditions.iter().map(Condition::to_wire).collect::<Vec<_>>(),
      "order_by": self.order_by.iter().map(OrderBy::to_wire).collect::<Vec<_>>(),
    })
  }
}
