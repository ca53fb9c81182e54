//! Entity model: dynamically-typed records, references, groupings and the
//! wire codec that maps them to and from JSON.

mod codec;
mod factory;
mod grouping;
mod types;

pub use codec::{format_datetime, parse_datetime, SchemaCodec, WireObject, SCHEMA_VERSION};
pub use factory::EntityFactory;
pub use grouping::{parse_groupings, Grouping};
pub use types::{Entity, FieldValue, Reference, Scalar, TypeProfile};
