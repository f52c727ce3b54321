//! WristSync core
//!
//! Shared building blocks for synchronizing a head-mounted client (BLE central)
//! with a wrist-worn companion (BLE peripheral):
//!
//! - [`types`] - timestamps and the [`TimeSource`] abstraction
//! - [`errors`] - the error taxonomy shared by every crate
//! - [`config`] - tunables for the link, heartbeat, handshake and notifier
//! - [`protocol`] - wire envelope, command payloads, CSV row contract, framing
//! - [`channel`] - typed messages exchanged between the engine and radio tasks
//! - [`link_task`] - capability trait implemented by real and simulated radios
//! - [`peripheral`] - companion-side notifier and command responder
//!
//! Everything in this crate is synchronous and driven by explicit timestamps so
//! that state machines can be exercised deterministically in tests.

pub mod channel;
pub mod config;
pub mod errors;
pub mod link_task;
pub mod peripheral;
pub mod protocol;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{Command, RadioEffect, RadioEvent, SyncEvent};
pub use config::{
    ChannelConfig, HeartbeatConfig, LinkConfig, NotifierConfig, SessionConfig, SyncConfig,
    TimeSyncConfig,
};
pub use errors::{
    LinkHealthError, ProtocolError, Result, SessionError, SyncError, TransportError,
};
pub use link_task::LinkTask;
pub use protocol::{Inbound, MessageType, StructuredMessage};
pub use types::{LinkState, SystemTimeSource, TimeSource, Timestamp};
