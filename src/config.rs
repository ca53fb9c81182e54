use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const DEFAULT_TTL_MILLIS: u64 = 3000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the entity service, e.g. `https://app.example.com`
  pub server: String,
  /// Application id used as the login name and as the cache key namespace
  pub application_id: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// No cache tier, only the in-process identity map
  None,
  /// In-process map, gone when the process exits
  #[default]
  Memory,
  /// SQLite database shared between runs
  Sqlite,
  /// Memcached servers shared between hosts
  Memcached,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// Database file for the sqlite backend (defaults to $XDG_DATA_HOME/entsdk/cache.db)
  pub path: Option<PathBuf>,
  /// Servers for the memcached backend, as `host` or `host:port`
  #[serde(default)]
  pub servers: Vec<String>,
  #[serde(default = "default_ttl_millis")]
  pub entity_ttl_ms: u64,
  #[serde(default = "default_ttl_millis")]
  pub page_ttl_ms: u64,
  #[serde(default = "default_ttl_millis")]
  pub call_ttl_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::default(),
      path: None,
      servers: Vec::new(),
      entity_ttl_ms: DEFAULT_TTL_MILLIS,
      page_ttl_ms: DEFAULT_TTL_MILLIS,
      call_ttl_ms: DEFAULT_TTL_MILLIS,
    }
  }
}

fn default_ttl_millis() -> u64 {
  DEFAULT_TTL_MILLIS
}

fn default_timeout_secs() -> u64 {
  DEFAULT_TIMEOUT_SECS
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./entsdk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/entsdk/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!("config file not found: {}", p.display())));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "no configuration file found, create one at ~/.config/entsdk/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("entsdk.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("entsdk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    Self::from_yaml(&contents)
      .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;

    if config.server.trim().is_empty() {
      return Err(Error::Config("server must not be empty".to_string()));
    }
    if config.application_id.trim().is_empty() {
      return Err(Error::Config("application_id must not be empty".to_string()));
    }
    Ok(config)
  }

  /// Get the application key from environment variables.
  ///
  /// Checks ENTSDK_APP_KEY first, then ENTSDK_PASSWORD as fallback.
  pub fn get_application_key() -> Result<String> {
    std::env::var("ENTSDK_APP_KEY")
      .or_else(|_| std::env::var("ENTSDK_PASSWORD"))
      .map_err(|_| {
        Error::Config(
          "application key not found. Set ENTSDK_APP_KEY or ENTSDK_PASSWORD environment variable."
            .to_string(),
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config = Config::from_yaml("server: https://app.example.com\napplication_id: svc\n").unwrap();

    assert_eq!(config.cache.backend, CacheBackend::Memory);
    assert_eq!(config.cache.entity_ttl_ms, 3000);
    assert_eq!(config.cache.call_ttl_ms, 3000);
    assert_eq!(config.timeout_secs, 30);
  }

  #[test]
  fn test_full_cache_section() {
    let yaml = r#"
server: https://app.example.com
application_id: svc
timeout_secs: 5
cache:
  backend: sqlite
  path: /tmp/entsdk.db
  entity_ttl_ms: 0
  page_ttl_ms: 1000
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.cache.backend, CacheBackend::Sqlite);
    assert_eq!(config.cache.path.as_deref(), Some(Path::new("/tmp/entsdk.db")));
    assert_eq!(config.cache.entity_ttl_ms, 0);
    assert_eq!(config.cache.page_ttl_ms, 1000);
    assert_eq!(config.cache.call_ttl_ms, 3000);
    assert_eq!(config.timeout_secs, 5);
  }

  #[test]
  fn test_memcached_servers() {
    let yaml = r#"
server: https://app.example.com
application_id: svc
cache:
  backend: memcached
  servers: [cache1, "cache2:11212"]
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.cache.backend, CacheBackend::Memcached);
    assert_eq!(config.cache.servers, vec!["cache1", "cache2:11212"]);
  }

  #[test]
  fn test_empty_server_is_rejected() {
    let err = Config::from_yaml("server: ''\napplication_id: svc\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
  }

  #[test]
  fn test_load_from_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "server: http://localhost:8080\napplication_id: svc\ncache:\n  backend: none").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.cache.backend, CacheBackend::None);
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/entsdk.yaml"))).unwrap_err();
    assert!(matches!(err, Error::Config(m) if m.contains("not found")));
  }
}
