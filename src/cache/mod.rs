//! Pluggable caching for remote data.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Stores entities, query pages and raw call responses as JSON under string keys
//! - Honors per-entry TTLs, where 0 means "never expires"
//! - Treats every tier as advisory: failures degrade to misses, never to errors

mod keys;
mod layer;
mod memcached;
mod memory;
mod storage;
mod traits;

pub use keys::CacheKey;
pub use layer::CacheLayer;
pub use memcached::MemcachedCache;
pub use memory::MemoryCache;
pub use storage::SqliteCache;
pub use traits::{CacheError, CacheSource, CacheTier};
