//! Error handling for the WristSync CLI

use thiserror::Error;
use wristsync_ble::BleError;
use wristsync_core::SyncError;
use wristsync_runtime::PreferencesError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] BleError),

    #[error("Preferences error: {0}")]
    Preferences(#[from] PreferencesError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
