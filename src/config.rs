use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Cache version baked in at build time; a version bump is a deployment
/// action, not a code change.
const BUILD_CACHE_VERSION: Option<&str> = option_env!("LINOGTOR_CACHE_VERSION");

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application (and its relative resources) is served from
  pub origin: String,
  pub cache: CacheConfig,
  /// Resources that must be in the current cache store after install
  pub manifest: Vec<String>,
  /// Document served to HTML requests that miss the cache while offline
  pub offline_document: String,
  /// URL schemes the interceptor never touches (case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub excluded_schemes: BTreeSet<String>,
  pub placeholder: PlaceholderConfig,
  pub notification: NotificationConfig,
  pub sync: SyncConfig,
  pub logging: LoggingConfig,
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  pub version: String,
  /// SQLite file backing the cache stores (default: $XDG_DATA_HOME/linogtor-agent/caches.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "linogtor".to_string(),
      version: BUILD_CACHE_VERSION.unwrap_or("v1.0.0").to_string(),
      path: None,
    }
  }
}

/// Response synthesized when nothing better is available offline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
  pub status: u16,
  pub status_text: String,
  pub body: String,
}

impl Default for PlaceholderConfig {
  fn default() -> Self {
    Self {
      status: 503,
      status_text: "Service Unavailable".to_string(),
      body: "Offline - Please check your internet connection".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationActionConfig {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push arrives without a payload
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Grouping tag; repeated alerts replace each other
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationActionConfig>,
  /// Page opened by the "view" action
  pub open_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "🚨 LINOGTOR Earthquake Alert".to_string(),
      default_body: "New earthquake detected near Bogo City!".to_string(),
      icon: "/static/icon-192.png".to_string(),
      badge: "/static/icon-192.png".to_string(),
      vibrate: vec![200, 100, 200],
      tag: "earthquake-alert".to_string(),
      require_interaction: true,
      actions: vec![
        NotificationActionConfig {
          action: "view".to_string(),
          title: "View Details".to_string(),
        },
        NotificationActionConfig {
          action: "close".to_string(),
          title: "Dismiss".to_string(),
        },
      ],
      open_url: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub tag: String,
  pub endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-earthquakes".to_string(),
      endpoint: "/api/earthquakes".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset (e.g. "linogtor_agent=debug")
  pub filter: Option<String>,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      cache: CacheConfig::default(),
      manifest: vec![
        "/".to_string(),
        "/static/manifest.json".to_string(),
        "/offline.html".to_string(),
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css".to_string(),
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string(),
        "https://cdn.tailwindcss.com".to_string(),
      ],
      offline_document: "/offline.html".to_string(),
      excluded_schemes: BTreeSet::from(["chrome-extension".to_string()]),
      placeholder: PlaceholderConfig::default(),
      notification: NotificationConfig::default(),
      sync: SyncConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./linogtor-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/linogtor-agent/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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
    let local = PathBuf::from("linogtor-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("linogtor-agent").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Name of the one current cache store, e.g. `linogtor-v1.0.0`.
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.cache.prefix, self.cache.version)
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(target)
      .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
  }

  /// Get the default cache database path.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("linogtor-agent").join("caches.db"))
  }
}
