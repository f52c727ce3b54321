//! WristSync CLI configuration
//!
//! One TOML file holds everything; every table is optional:
//!
//! ```toml
//! data_dir = "/var/lib/wristsync"
//!
//! [sync.session]
//! require_peer_confirmation = true
//!
//! [ble]
//! adapter_index = 1
//!
//! [companion]
//! local_name = "Lab Watch 3"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wristsync_ble::{BleLinkConfig, CompanionServerConfig};
use wristsync_core::SyncConfig;
use wristsync_runtime::Preferences;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine tunables
    pub sync: SyncConfig,
    pub ble: BleSettings,
    pub companion: CompanionSettings,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
}

/// Headset radio options not covered by the link config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSettings {
    pub adapter_index: usize,
    pub write_with_response: bool,
}

/// Companion role options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionSettings {
    pub local_name: String,
    /// Acknowledge SYNC_START as ready
    pub ready: bool,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            local_name: "WristSync Companion".to_string(),
            ready: true,
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        if self.companion.local_name.trim().is_empty() {
            return Err(CliError::Config("companion.local_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Flag, then config file, then the platform default
    pub fn resolve_data_dir(&self, flag: Option<&str>) -> Result<PathBuf> {
        if let Some(dir) = flag {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        Ok(Preferences::default_dir()?)
    }

    pub fn ble_link_config(&self) -> BleLinkConfig {
        BleLinkConfig::from(&self.sync.link)
            .with_adapter_index(self.ble.adapter_index)
            .with_write_with_response(self.ble.write_with_response)
    }

    pub fn companion_config(&self) -> CompanionServerConfig {
        CompanionServerConfig::from(&self.sync)
            .with_local_name(self.companion.local_name.clone())
            .with_ready(self.companion.ready)
    }
}
