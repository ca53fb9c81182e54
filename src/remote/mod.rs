//! Remote service access: the transport seam, its HTTP implementation, the
//! call-caching wrapper and the typed entity operations built on top.

pub mod api;
pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod transport;

pub use api::{EntityApi, NamespaceConditions, DEFAULT_CALL_TTL_MILLIS};
pub use api_types::ApiQueryResponse;
pub use cached_client::CachedTransport;
pub use client::{Credentials, HttpTransport, API_VERSION};
pub use transport::{Method, Request, Transport};
