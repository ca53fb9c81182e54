//! Error types for the entity access layer.

use thiserror::Error;

/// Result type for entity access operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers.
///
/// A missing entity is not an error: lookups return `Ok(None)` instead.
/// Cache tier failures never show up here either, they are logged and absorbed.
#[derive(Debug, Error)]
pub enum Error {
  /// The server answered with an error payload, or the transport itself failed.
  #[error("remote error: {0}")]
  Remote(String),

  /// A wire payload was missing identity fields or a field had the wrong kind.
  #[error("schema error: {0}")]
  Schema(String),

  /// The operation cannot be performed on the given entity.
  #[error("invalid operation: {0}")]
  InvalidOperation(String),

  /// Configuration could not be loaded or is incomplete.
  #[error("config error: {0}")]
  Config(String),
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::Remote(e.to_string())
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Schema(e.to_string())
  }
}
