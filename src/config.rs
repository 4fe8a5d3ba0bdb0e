use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{ModelDecl, StoreSettings, DEFAULT_BATCH_BUDGET, DEFAULT_REFRESH_THROTTLE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Model types to set up at startup
  #[serde(default)]
  pub models: Vec<ModelDecl>,
  /// Endpoint to load custom attribute definitions from, e.g.
  /// "GET /api/custom_attribute_definitions"
  pub custom_attribute_definitions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
  /// How long one batch of a list may stay open, in milliseconds
  #[serde(default = "default_batch_budget_ms")]
  pub batch_budget_ms: u64,
  /// Window in which repeated refreshes share one request, in milliseconds
  #[serde(default = "default_refresh_throttle_ms")]
  pub refresh_throttle_ms: u64,
}

fn default_batch_budget_ms() -> u64 {
  DEFAULT_BATCH_BUDGET.as_millis() as u64
}

fn default_refresh_throttle_ms() -> u64 {
  DEFAULT_REFRESH_THROTTLE.as_millis() as u64
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      batch_budget_ms: default_batch_budget_ms(),
      refresh_throttle_ms: default_refresh_throttle_ms(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./grcm.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/grcm/config.yaml
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
        "No configuration file found. Create one at ~/.config/grcm/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("grcm.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("grcm").join("config.yaml");
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

  pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// API token from `GRCM_API_TOKEN`, if set.
  pub fn api_token() -> Option<String> {
    std::env::var("GRCM_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  pub fn store_settings(&self) -> StoreSettings {
    StoreSettings {
      batch_budget: Duration::from_millis(self.cache.batch_budget_ms),
      refresh_throttle: Duration::from_millis(self.cache.refresh_throttle_ms),
    }
  }
}
