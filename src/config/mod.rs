//! Configuration module for FieldLog-RS
//!
//! This module handles the application configuration:
//! - Controller tuning (delayed stop, idle polling)
//! - Logging (filter directive, optional log directory)
//! - Simulated sensors for the demo binary
//!
//! # App Data Location
//!
//! The configuration file is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.hxyulin.fieldlog-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.fieldlog-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.fieldlog-rs\`
//!
//! # Files
//!
//! - `config.toml` - The [`AppConfig`] serialized as TOML
//!
//! # Example
//!
//! ```ignore
//! use fieldlog_rs::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default();
//! config.controller.stop_delay_ms = 500;
//! config.save()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{FieldLogError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.fieldlog-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default idle poll interval of the controller actor in milliseconds
pub const DEFAULT_IDLE_POLL_INTERVAL_MS: u64 = 50;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        FieldLogError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            FieldLogError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the config file
pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== App Config ====================

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    /// Recording controller tuning
    #[serde(default)]
    pub controller: ControllerSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Simulated sensors for the demo binary
    #[serde(default)]
    pub simulation: SimulationSettings,
}

fn default_config_version() -> u32 {
    1
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            controller: ControllerSettings::default(),
            logging: LoggingSettings::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load the config from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FieldLogError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| FieldLogError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the config from the default location
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = config_path().ok_or_else(|| {
            FieldLogError::Config("Could not determine config path".to_string())
        })?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(path)
    }

    /// Load the config, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to a specific file
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FieldLogError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| FieldLogError::Config(format!("Failed to write config: {}", e)))
    }

    /// Save the config to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(CONFIG_FILE))
    }
}
