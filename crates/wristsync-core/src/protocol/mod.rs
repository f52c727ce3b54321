//! Wire protocol between headset and companion
//!
//! - [`constants`] - GATT layout and size limits
//! - [`message`] - the structured JSON envelope and its type tag
//! - [`commands`] - typed payloads carried inside envelopes
//! - [`framing`] - line reassembly and MTU chunking
//! - [`csv`] - the sensor row contract

pub mod commands;
pub mod constants;
pub mod csv;
pub mod framing;
pub mod message;

pub use commands::{
    SyncAcknowledgment, SyncStartCommand, SyncStopCommand, TimeSyncRequest,
    TimeSyncResponse, VideoChangeCommand,
};
pub use constants::*;
pub use csv::{CsvFeed, CsvLine, SensorReading};
pub use framing::{chunk_payload, LineAssembler};
pub use message::{Inbound, MessageType, StructuredMessage};
