use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::api_types::{error_message, ApiAuthResponse};
use super::transport::{Method, Request, Transport};
use crate::error::{Error, Result};

/// Version of the remote API this client speaks.
pub const API_VERSION: u32 = 2;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Application credentials exchanged for a session token.
#[derive(Clone)]
pub struct Credentials {
  pub application_id: String,
  pub application_key: String,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("application_id", &self.application_id)
      .finish_non_exhaustive()
  }
}

/// HTTP transport wrapper around reqwest.
pub struct HttpTransport {
  http: reqwest::Client,
  server: String,
  credentials: Credentials,
  token: Mutex<Option<String>>,
}

impl HttpTransport {
  pub fn new(server: &str, credentials: Credentials) -> Result<Self> {
    Self::with_timeout(server, credentials, DEFAULT_TIMEOUT)
  }

  pub fn with_timeout(server: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
    Url::parse(server).map_err(|e| Error::Config(format!("invalid server url {}: {}", server, e)))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      server: server.trim_end_matches('/').to_string(),
      credentials,
      token: Mutex::new(None),
    })
  }

  fn endpoint(&self, controller: &str, action: &str) -> Result<Url> {
    let raw = format!(
      "{}/api/{}/{}/{}",
      self.server, API_VERSION, controller, action
    );
    Url::parse(&raw).map_err(|e| Error::Remote(format!("invalid endpoint {}: {}", raw, e)))
  }

  /// Exchange the application credentials for a session token.
  pub async fn authenticate(&self) -> Result<String> {
    let mut url = self.endpoint("authentication", "authenticate")?;
    url
      .query_pairs_mut()
      .append_pair("username", &self.credentials.application_id)
      .append_pair("password", &self.credentials.application_key);

    let response: ApiAuthResponse = self.http.get(url).send().await?.json().await?;

    match response.session_token {
      Some(token) if response.result == "SUCCESS" && !token.is_empty() => Ok(token),
      _ => Err(Error::Remote(format!(
        "auth failed: {}",
        response.reason.unwrap_or(response.result)
      ))),
    }
  }

  /// Current session token, authenticating on first use.
  async fn session_token(&self) -> Result<String> {
    let mut token = self.token.lock().await;
    if let Some(t) = token.as_ref() {
      return Ok(t.clone());
    }

    let fresh = self.authenticate().await?;
    *token = Some(fresh.clone());
    Ok(fresh)
  }

  async fn send(&self, request: Request) -> Result<Value> {
    let token = self.session_token().await?;
    let mut url = self.endpoint(&request.controller, &request.action)?;

    debug!(
      method = %request.method,
      controller = %request.controller,
      action = %request.action,
      "sending request"
    );

    let builder = match request.method {
      Method::Get => {
        append_query(&mut url, &request.payload);
        self.http.get(url)
      }
      // .json() also sets Content-Type: application/json
      Method::Post => self.http.post(url).json(&request.payload),
    };

    let response = builder.header("Authentication", token).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if body.trim().is_empty() {
      return if status.is_success() {
        Ok(Value::Null)
      } else {
        Err(Error::Remote(format!("request failed with status {}", status)))
      };
    }

    let value: Value = serde_json::from_str(&body)
      .map_err(|e| Error::Remote(format!("invalid response (status {}): {}", status, e)))?;

    // Error payloads are passed on so callers can report the server's message
    if !status.is_success() && error_message(&value).is_none() {
      return Err(Error::Remote(format!("request failed with status {}", status)));
    }
    Ok(value)
  }
}

impl Transport for HttpTransport {
  fn call(&self, request: Request) -> BoxFuture<'_, Result<Value>> {
    self.send(request).boxed()
  }
}

/// Flatten a payload object into query parameters.
/// List values become repeated `name[]=value` pairs.
fn append_query(url: &mut Url, payload: &Value) {
  let Some(params) = payload.as_object() else {
    return;
  };
  if params.is_empty() {
    return;
  }

  let mut pairs = url.query_pairs_mut();
  for (name, value) in params {
    match value {
      Value::Array(items) => {
        let key = format!("{}[]", name);
        for item in items {
          pairs.append_pair(&key, &param_text(item));
        }
      }
      other => {
        pairs.append_pair(name, &param_text(other));
      }
    }
  }
}

fn param_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}
