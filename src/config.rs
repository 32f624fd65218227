use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Storefront origin, e.g. "https://shop.example.com"
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Database file (default: $XDG_DATA_HOME/offcart/offline.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  /// Path prefix that marks a request as an API call
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// API path prefixes served network-first with cache fallback
  #[serde(default = "default_cacheable")]
  pub cacheable: Vec<String>,
  /// Path prefixes treated as static assets (cache-first)
  #[serde(default = "default_static_prefixes")]
  pub static_prefixes: Vec<String>,
  /// File extensions treated as static assets (case-insensitive, no dot)
  #[serde(
    default = "default_static_extensions",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub static_extensions: BTreeSet<String>,
  /// Product list endpoint, snapshotted into the catalog partition
  #[serde(default = "default_products_path")]
  pub products_path: String,
  /// Category list endpoint, snapshotted into the catalog partition
  #[serde(default = "default_categories_path")]
  pub categories_path: String,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: default_api_prefix(),
      cacheable: default_cacheable(),
      static_prefixes: default_static_prefixes(),
      static_extensions: default_static_extensions(),
      products_path: default_products_path(),
      categories_path: default_categories_path(),
    }
  }
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_cacheable() -> Vec<String> {
  [
    "/api/products",
    "/api/categories",
    "/api/reviews",
    "/api/users/me",
    "/api/wishlist",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_static_prefixes() -> Vec<String> {
  vec!["/static/".to_string(), "/assets/".to_string()]
}

fn default_static_extensions() -> BTreeSet<String> {
  ["js", "css", "woff", "woff2", "ttf", "ico", "webmanifest"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_products_path() -> String {
  "/api/products".to_string()
}

fn default_categories_path() -> String {
  "/api/categories".to_string()
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CacheConfig {
  /// Upper bound on stored responses; oldest are evicted first. Unbounded when unset.
  pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QueueConfig {
  /// Log a warning once the pending log holds more entries than this
  #[serde(default = "default_warn_threshold")]
  pub warn_threshold: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      warn_threshold: default_warn_threshold(),
    }
  }
}

fn default_warn_threshold() -> usize {
  500
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// Path probed to decide whether the storefront is reachable
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: default_probe_path(),
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

impl ConnectivityConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

fn default_probe_path() -> String {
  "/api/health".to_string()
}

fn default_probe_interval_secs() -> u64 {
  15
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcart.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcart/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcart/config.yaml\n\
                 with at least `remote: {{ base_url: https://your-shop }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offcart.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcart").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    url::Url::parse(&config.remote.base_url)
      .map_err(|e| eyre!("Invalid remote.base_url '{}': {}", config.remote.base_url, e))?;
    Ok(config)
  }

  /// Get the storefront API token from the environment, if any.
  ///
  /// Authentication is handled by an external identity provider; the token
  /// is only forwarded as a bearer credential.
  pub fn api_token() -> Option<String> {
    std::env::var("OFFCART_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// Base directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcart"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_fills_defaults() {
    let config = Config::parse("remote:\n  base_url: https://shop.example.com\n").unwrap();

    assert_eq!(config.remote.timeout_secs, 10);
    assert_eq!(config.routes.api_prefix, "/api/");
    assert!(config.routes.cacheable.iter().any(|p| p == "/api/products"));
    assert!(config.routes.static_extensions.contains("css"));
    assert_eq!(config.cache.max_entries, None);
    assert_eq!(config.queue.warn_threshold, 500);
    assert_eq!(config.connectivity.probe_path, "/api/health");
  }

  #[test]
  fn test_static_extensions_are_normalized() {
    let yaml = r#"
remote:
  base_url: https://shop.example.com
routes:
  static_extensions: [".JS", "Css"]
cache:
  max_entries: 200
"#;
    let config = Config::parse(yaml).unwrap();

    assert!(config.routes.static_extensions.contains("js"));
    assert!(config.routes.static_extensions.contains("css"));
    assert_eq!(config.cache.max_entries, Some(200));
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(Config::parse("remote:\n  base_url: not a url\n").is_err());
  }
}
