use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::DEFAULT_WORKERS;

/// Environment variable holding the bearer token for the remote service.
pub const ID_TOKEN_ENV: &str = "CITYWATCH_ID_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the callable functions, e.g. `https://region-project.cloudfunctions.net`
  pub base_url: Url,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Database file (default: $XDG_DATA_HOME/citywatch-sync/cache.db)
  pub path: Option<PathBuf>,
  pub workers: usize,
  pub reports_ttl_secs: u64,
  pub comments_ttl_secs: u64,
  pub profile_ttl_secs: u64,
  pub checksum_throttle_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      workers: DEFAULT_WORKERS,
      reports_ttl_secs: 5 * 60,
      comments_ttl_secs: 2 * 60,
      profile_ttl_secs: 10 * 60,
      checksum_throttle_ms: 2000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Write logs to a daily-rolling file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

/// Runtime knobs of the sync repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
  pub workers: usize,
  pub reports_ttl: Duration,
  pub comments_ttl: Duration,
  pub profile_ttl: Duration,
  /// Minimum gap between two navigation checksum fetches
  pub checksum_throttle: Duration,
}

impl Default for SyncConfig {
  fn default() -> Self {
    CacheConfig::default().sync_config()
  }
}

impl CacheConfig {
  pub fn sync_config(&self) -> SyncConfig {
    SyncConfig {
      workers: self.workers,
      reports_ttl: Duration::from_secs(self.reports_ttl_secs),
      comments_ttl: Duration::from_secs(self.comments_ttl_secs),
      profile_ttl: Duration::from_secs(self.profile_ttl_secs),
      checksum_throttle: Duration::from_millis(self.checksum_throttle_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./citywatch-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/citywatch-sync/config.yaml
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
        "No configuration file found. Create one at ~/.config/citywatch-sync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("citywatch-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("citywatch-sync").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.cache.workers == 0 {
      return Err(eyre!("cache.workers must be at least 1"));
    }
    Ok(config)
  }

  /// Bearer token for the remote service, if one is set.
  pub fn id_token() -> Option<String> {
    std::env::var(ID_TOKEN_ENV).ok().filter(|t| !t.is_empty())
  }

  pub fn sync_config(&self) -> SyncConfig {
    self.cache.sync_config()
  }
}
