//! The seam between the entity layer and the wire.

use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One remote call: `controller/action` with a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub controller: String,
  pub action: String,
  pub method: Method,
  pub payload: Value,
  /// How long a successful response may be served from cache; 0 disables caching
  pub cache_ttl_millis: u64,
}

impl Request {
  pub fn new(method: Method, controller: &str, action: &str, payload: Value) -> Self {
    Self {
      controller: controller.to_string(),
      action: action.to_string(),
      method,
      payload,
      cache_ttl_millis: 0,
    }
  }

  pub fn get(controller: &str, action: &str, payload: Value) -> Self {
    Self::new(Method::Get, controller, action, payload)
  }

  pub fn post(controller: &str, action: &str, payload: Value) -> Self {
    Self::new(Method::Post, controller, action, payload)
  }

  pub fn cached_for(mut self, ttl_millis: u64) -> Self {
    self.cache_ttl_millis = ttl_millis;
    self
  }
}

/// Performs remote calls and returns the decoded JSON body.
///
/// Transport failures (connection, timeout, authentication, undecodable body)
/// are reported as [`crate::Error::Remote`]. Error-shaped payloads are returned
/// as values; interpreting them is up to the caller.
pub trait Transport: Send + Sync {
  fn call(&self, request: Request) -> BoxFuture<'_, Result<Value>>;
}

#[cfg(test)]
pub(crate) mod mock {
  //! Scripted transport for tests.

  use super::*;
  use futures::FutureExt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  type Responder = Box<dyn Fn(&Request) -> Result<Value> + Send + Sync>;

  /// Transport answering every call through a closure and recording requests.
  pub struct MockTransport {
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
    delay: Duration,
  }

  impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
      F: Fn(&Request) -> Result<Value> + Send + Sync + 'static,
    {
      Self {
        responder: Box::new(responder),
        calls: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
        delay: Duration::ZERO,
      }
    }

    /// Delay every response, to keep calls in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = delay;
      self
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
      self.requests.lock().unwrap().clone()
    }
  }

  impl Transport for MockTransport {
    fn call(&self, request: Request) -> BoxFuture<'_, Result<Value>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let result = (self.responder)(&request);
      self.requests.lock().unwrap().push(request);
      let delay = self.delay;
      async move {
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
        result
      }
      .boxed()
    }
  }
}
