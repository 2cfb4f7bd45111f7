use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_CACHE_SECONDS;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Type aliases: alias -> canonical type name (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_map")]
  pub types: BTreeMap<String, String>,
}

fn deserialize_lowercase_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let m: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
  Ok(
    m.into_iter()
      .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
      .collect(),
  )
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds a successful fetch stays fresh
  #[serde(default = "default_cache_seconds")]
  pub cache_seconds: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      cache_seconds: default_cache_seconds(),
    }
  }
}

fn default_cache_seconds() -> u64 {
  DEFAULT_CACHE_SECONDS
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL; collections are read from `{url}/{type}`
  pub url: Option<String>,
  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_seconds: default_timeout_seconds(),
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_seconds)
  }
}

fn default_timeout_seconds() -> u64 {
  30
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// Records live for the lifetime of the process
  #[default]
  Memory,
  /// Records persist in a SQLite database
  Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  #[serde(default)]
  pub backend: StorageBackend,
  /// Database path for the sqlite backend (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storeguard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storeguard/config.yaml
  ///
  /// Without a config file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storeguard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storeguard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// The configured remote URL, required for fetching.
  pub fn remote_url(&self) -> Result<&str> {
    self.remote.url.as_deref().ok_or_else(|| {
      eyre!("No remote URL configured. Set remote.url in storeguard.yaml or pass --url.")
    })
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks STOREGUARD_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STOREGUARD_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_without_file_contents() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.cache.cache_seconds, 600);
    assert_eq!(config.remote.timeout(), Duration::from_secs(30));
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert!(config.types.is_empty());
    assert!(config.remote_url().is_err());
  }

  #[test]
  fn test_parse_full_config() {
    let config = Config::parse(
      r#"
cache:
  cache_seconds: 120
remote:
  url: https://api.example.com/v1
  timeout_seconds: 5
storage:
  backend: sqlite
  path: /tmp/records.db
types:
  Widget: Widgets
"#,
    )
    .unwrap();

    assert_eq!(config.cache.cache_seconds, 120);
    assert_eq!(config.remote_url().unwrap(), "https://api.example.com/v1");
    assert_eq!(config.remote.timeout(), Duration::from_secs(5));
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/records.db")));
    assert_eq!(config.types.get("widget").map(String::as_str), Some("widgets"));
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let config = Config::parse("remote:\n  url: http://localhost:8080\n").unwrap();
    assert_eq!(config.cache.cache_seconds, 600);
    assert_eq!(config.remote.timeout_seconds, 30);
  }

  #[test]
  fn test_rejects_unknown_backend() {
    assert!(Config::parse("storage:\n  backend: redis\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/storeguard.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
