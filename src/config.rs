use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::list::ListOptions;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub demo: DemoConfig,
}

/// Timing and paging knobs for the synchronization core.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
  /// How long fetched pages stay fresh
  pub ttl_secs: u64,
  /// Quiet period before a filter edit is committed
  pub debounce_ms: u64,
  /// How long after a fetch live events for the same resource are dropped
  pub realtime_guard_ms: u64,
  pub page_size: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      ttl_secs: 30,
      debounce_ms: 300,
      realtime_guard_ms: 1000,
      page_size: 20,
    }
  }
}

impl SyncConfig {
  pub fn list_options(&self) -> ListOptions {
    ListOptions {
      ttl: Duration::from_secs(self.ttl_secs),
      debounce_window: Duration::from_millis(self.debounce_ms),
      page_size: self.page_size,
      ..ListOptions::default()
    }
  }

  pub fn guard_window(&self) -> Duration {
    Duration::from_millis(self.realtime_guard_ms)
  }
}

/// Settings for the scripted demo run by the binary.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DemoConfig {
  pub resource: String,
  /// Number of records the in-memory backend starts with
  pub seed: usize,
  /// Simulated round-trip time of the in-memory backend
  pub latency_ms: u64,
}

impl Default for DemoConfig {
  fn default() -> Self {
    Self {
      resource: "customers".to_string(),
      seed: 5,
      latency_ms: 50,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./livelist.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/livelist/config.yaml
  ///
  /// Without an explicit path, a missing file means defaults.
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
    let local = PathBuf::from("livelist.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("livelist").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.sync.list_options().ttl, Duration::from_secs(30));
    assert_eq!(
      config.sync.list_options().debounce_window,
      Duration::from_millis(300)
    );
    assert_eq!(config.sync.guard_window(), Duration::from_secs(1));
    assert_eq!(config.demo.resource, "customers");
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::parse("sync:\n  debounce_ms: 150\n").unwrap();
    assert_eq!(config.sync.debounce_ms, 150);
    assert_eq!(config.sync.ttl_secs, 30);
    assert_eq!(config.demo, DemoConfig::default());
  }

  #[test]
  fn test_empty_map_is_default() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config, Config::default());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/nonexistent/livelist.yaml")));
    assert!(result.is_err());
  }
}
