//! Bluetooth Low Energy links for WristSync
//!
//! Both ends of the companion link over real radios:
//!
//! - [`central`] - [`BleCentralLink`], the headset side. Implements
//!   [`LinkTask`](wristsync_core::LinkTask) on top of btleplug so the sync
//!   engine can drive it like any other link.
//! - [`peripheral`] - [`CompanionServer`], the wrist side. Serves the sync
//!   service as a GATT application and streams CSV rows to subscribers.
//! - [`config`] - radio settings derived from the core configuration
//! - [`error`] - Bluetooth stack errors and their mapping onto `SyncError`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wristsync_ble::{BleCentralLink, BleLinkConfig};
//! use wristsync_core::SyncConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::default();
//! let mut link = BleCentralLink::new(BleLinkConfig::from(&config.link));
//! link.initialize().await?;
//! // hand `link` to `SyncRuntime::with_link`
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Central**: every platform btleplug supports
//! - **Peripheral**: Linux with BlueZ; elsewhere `CompanionServer::run`
//!   returns [`BleError::PeripheralUnsupported`]

pub mod central;
pub mod config;
pub mod error;
pub mod peripheral;

pub use central::BleCentralLink;
pub use config::{BleLinkConfig, CompanionServerConfig};
pub use error::{BleError, Result};
pub use peripheral::{CompanionServer, CompanionState, SensorFeed, SensorUpdate};
