use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::db::Database;

/// Built-in page served when neither the network nor the cache can answer.
const DEFAULT_OFFLINE_DOCUMENT: &str = include_str!("../assets/offline.html");

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Name of the current cache generation
  pub cache_version: String,
  /// Base URL of the dashboard; relative keys resolve against it
  pub origin: Url,
  /// Host fragments that mark live-data requests (case-insensitive)
  #[serde(
    default = "default_bypass_hosts",
    deserialize_with = "deserialize_lowercase_list"
  )]
  pub bypass_hosts: Vec<String>,
  /// Mandatory assets fetched during install, in order
  #[serde(default)]
  pub assets: Vec<AssetEntry>,
  #[serde(default = "default_offline_key")]
  pub offline_key: String,
  /// HTML file to use instead of the built-in offline page
  pub offline_document: Option<PathBuf>,
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// Activate right after a successful install
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
  pub database: Option<PathBuf>,
  /// URL polled by `watch` to detect connectivity
  pub probe_url: Option<Url>,
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
  pub log_dir: Option<PathBuf>,
}

/// One entry of the precache manifest.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssetEntry {
  pub key: String,
  pub content_type: String,
}

fn default_bypass_hosts() -> Vec<String> {
  vec!["firebase".to_string(), "googleapis".to_string()]
}

fn default_offline_key() -> String {
  "/offline.html".to_string()
}

fn default_sync_tag() -> String {
  "sync-pending-actions".to_string()
}

fn default_true() -> bool {
  true
}

fn default_request_timeout() -> u64 {
  30
}

fn default_probe_interval() -> u64 {
  15
}

fn deserialize_lowercase_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./errands-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/errands-offline/config.yaml
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
        "No configuration file found. Create one at ~/.config/errands-offline/config.yaml\n\
                 See errands-offline.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("errands-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("errands-offline").join("config.yaml");
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
    if config.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    Ok(config)
  }

  /// The HTML served as the offline fallback.
  pub fn offline_document(&self) -> Result<String> {
    match &self.offline_document {
      Some(path) => std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read offline document {}: {}", path.display(), e)),
      None => Ok(DEFAULT_OFFLINE_DOCUMENT.to_string()),
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Database::default_path(),
    }
  }

  /// Directory for the rolling log file, next to the database by default.
  pub fn log_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log_dir {
      return Ok(dir.clone());
    }
    let db_path = self.database_path()?;
    Ok(
      db_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")),
    )
  }
}
