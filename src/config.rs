//! Session configuration with persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mpv::DEFAULT_SOCKET_PATH;

const CONFIG_DIR_NAME: &str = "mpv-session";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<PathBuf>,

  /// IPC socket MPV is told to create.
  #[serde(default = "default_socket_path")]
  pub socket_path: String,

  /// Flags added to every session; an empty value is a bare switch.
  #[serde(default)]
  pub flags: BTreeMap<String, String>,

  /// Pause between spawning MPV and the first connection attempt.
  #[serde(default = "default_settle_delay_ms")]
  pub settle_delay_ms: u64,

  /// Connection attempts before giving up on the socket.
  #[serde(default = "default_connect_retries")]
  pub connect_retries: u32,
}

fn default_socket_path() -> String {
  DEFAULT_SOCKET_PATH.to_string()
}

fn default_settle_delay_ms() -> u64 {
  1000
}

fn default_connect_retries() -> u32 {
  10
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      mpv_path: None,
      socket_path: default_socket_path(),
      flags: BTreeMap::new(),
      settle_delay_ms: default_settle_delay_ms(),
      connect_retries: default_connect_retries(),
    }
  }
}

impl SessionConfig {
  /// Default config file location, e.g. `~/.config/mpv-session/config.json`.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
  }

  /// Load from an explicit file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate().map_err(ConfigError::Invalid)?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
  }

  /// Load from the default location, falling back to defaults if no file exists.
  pub fn load_default() -> Result<Self, ConfigError> {
    match Self::default_path() {
      Some(path) if path.exists() => Self::load(&path),
      _ => {
        log::debug!("No config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  /// Write the config as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    std::fs::write(path, text).map_err(io_err)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.socket_path.trim().is_empty() {
      return Err("Socket path cannot be empty".to_string());
    }
    if self.connect_retries < 1 || self.connect_retries > 100 {
      return Err("Connect retries must be between 1 and 100".to_string());
    }
    if self.settle_delay_ms > 60_000 {
      return Err("Settle delay cannot exceed 60 seconds".to_string());
    }
    if self.flags.contains_key("input-ipc-server") {
      return Err("Set socketPath instead of the input-ipc-server flag".to_string());
    }
    Ok(())
  }

  pub fn settle_delay(&self) -> Duration {
    Duration::from_millis(self.settle_delay_ms)
  }
}
