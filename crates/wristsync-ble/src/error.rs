//! Error types for the BLE links

use thiserror::Error;
use wristsync_core::{SyncError, TransportError};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the Bluetooth stacks
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Bluetooth stack error: {0}")]
    Stack(String),

    #[error("Failed to scan: {0}")]
    ScanFailed(String),

    #[error("Device {address} was not seen by the adapter")]
    DeviceNotFound { address: String },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Peripheral role not supported on this platform")]
    PeripheralUnsupported,

    #[error("Failed to serve GATT application: {0}")]
    GattServer(String),
}

impl From<btleplug::Error> for BleError {
    fn from(err: btleplug::Error) -> Self {
        BleError::Stack(err.to_string())
    }
}

#[cfg(target_os = "linux")]
impl From<bluer::Error> for BleError {
    fn from(err: bluer::Error) -> Self {
        BleError::Stack(err.to_string())
    }
}

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::AdapterNotAvailable | BleError::PeripheralUnsupported => {
                TransportError::AdapterUnavailable
            }
            BleError::ScanFailed(reason) => TransportError::ScanFailed { reason },
            BleError::DeviceNotFound { address } => TransportError::ConnectFailed {
                address,
                reason: "device not seen by adapter".to_string(),
            },
            BleError::ConnectionFailed { address, reason } => {
                TransportError::ConnectFailed { address, reason }
            }
            BleError::ServiceDiscoveryFailed(reason) => TransportError::DiscoveryFailed { reason },
            BleError::CharacteristicNotFound { characteristic } => TransportError::DiscoveryFailed {
                reason: format!("characteristic {characteristic} not found"),
            },
            BleError::SubscriptionFailed(reason) => TransportError::SubscriptionFailed { reason },
            BleError::WriteFailed(reason) => TransportError::WriteFailed { reason },
            BleError::NotConnected => TransportError::NotConnected,
            BleError::Stack(reason) | BleError::GattServer(reason) => {
                TransportError::WriteFailed { reason }
            }
        }
    }
}

impl From<BleError> for SyncError {
    fn from(err: BleError) -> Self {
        SyncError::Transport(err.into())
    }
}

/// Result type for BLE operations
pub type Result<T> = std::result::Result<T, BleError>;
