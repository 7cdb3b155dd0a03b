use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub linear: LinearConfig,
  /// Team reviewed by default when none is given on the command line
  pub default_team: Option<String>,
  #[serde(default)]
  pub cache: CacheSettings,
  /// Outbound request budget; 0 disables client-side pacing
  #[serde(default = "default_requests_per_minute")]
  pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinearConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  pub sweep_interval_secs: u64,
  pub sweep_grace_secs: u64,
  /// Mirror stable categories to disk so they survive restarts
  pub persist: bool,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      sweep_interval_secs: 60,
      sweep_grace_secs: 300,
      persist: true,
    }
  }
}

impl CacheSettings {
  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }

  pub fn sweep_grace(&self) -> Duration {
    Duration::from_secs(self.sweep_grace_secs)
  }
}

fn default_api_url() -> String {
  "https://api.linear.app/graphql".to_string()
}

fn default_requests_per_minute() -> u32 {
  100
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./linport.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/linport/config.yaml
  /// 4. ~/.config/linport/config.yaml
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
        "No configuration file found. Create one at ~/.config/linport/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("linport.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("linport").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the Linear API key from environment variables.
  ///
  /// Checks LINPORT_API_KEY first, then LINEAR_API_KEY as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("LINPORT_API_KEY")
      .or_else(|_| std::env::var("LINEAR_API_KEY"))
      .map_err(|_| {
        eyre!(
          "Linear API key not found. Set LINPORT_API_KEY or LINEAR_API_KEY environment variable."
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config: Config = serde_yaml::from_str("linear: {}\n").unwrap();

    assert_eq!(config.linear.url, "https://api.linear.app/graphql");
    assert_eq!(config.requests_per_minute, 100);
    assert!(config.cache.persist);
    assert_eq!(config.cache.sweep_interval(), Duration::from_secs(60));
  }

  #[test]
  fn test_cache_settings_override() {
    let config: Config = serde_yaml::from_str(
      "linear:\n  url: https://linear.example.com/graphql\ncache:\n  sweep_interval_secs: 10\n  persist: false\n",
    )
    .unwrap();

    assert_eq!(config.linear.url, "https://linear.example.com/graphql");
    assert_eq!(config.cache.sweep_interval(), Duration::from_secs(10));
    assert!(!config.cache.persist);
  }
}
