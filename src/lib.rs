//! Client-side access layer for a remote JSON/HTTP entity store.
//!
//! Entities are resolved through an identity map backed by an optional cache
//! tier and the remote service, so every `(object_type, id)` is materialized
//! once per process. Queries are paged through [`ResultPage`].

pub mod cache;
pub mod collection;
pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod remote;
pub mod resolver;
pub mod sdk;

pub use collection::ResultPage;
pub use config::Config;
pub use entity::{Entity, EntityFactory, FieldValue, Grouping, Reference, Scalar, SchemaCodec};
pub use error::{Error, Result};
pub use query::{Direction, QuerySpec};
pub use resolver::EntityResolver;
pub use sdk::Sdk;
