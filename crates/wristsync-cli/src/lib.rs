//! WristSync CLI library
//!
//! Headset-side commands (scan, connect, record) drive a
//! [`wristsync_runtime::SyncRuntime`] over Bluetooth or a simulated link;
//! `companion` runs the wrist-side GATT server on Linux.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod demo;
pub mod error;
pub mod recording;

pub use app::WristSyncApp;
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
