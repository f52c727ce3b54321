//! Message Router
//!
//! Turns notification chunks into complete lines and classifies each one:
//! structured envelopes go through a fixed dispatch table, CSV lines become
//! sensor readings, and anything else is passed on as raw text.

use smallvec::SmallVec;
use tracing::{debug, trace, warn};
use wristsync_core::protocol::{CsvFeed, CsvLine, LineAssembler, SensorReading};
use wristsync_core::{Inbound, MessageType, Result, StructuredMessage};

use crate::link::LinkManager;

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

/// Destination of one inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// `PONG` for the heartbeat monitor
    Latency(StructuredMessage),
    /// `TIME_SYNC_RESPONSE` for the time sync engine
    Offset(StructuredMessage),
    /// `DATA` for structured data observers
    Data(StructuredMessage),
    /// `ACK`, logged only
    Ack(StructuredMessage),
    /// Any other structured message
    Structured(StructuredMessage),
    CsvHeader,
    Sensor(SensorReading),
    Raw(String),
}

/// Fixed decision table on the message type
pub fn dispatch_for(message: StructuredMessage) -> Dispatch {
    match message.kind() {
        MessageType::Pong => Dispatch::Latency(message),
        MessageType::TimeSyncResponse => Dispatch::Offset(message),
        MessageType::Data => Dispatch::Data(message),
        MessageType::Ack => Dispatch::Ack(message),
        _ => Dispatch::Structured(message),
    }
}

/// Router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub chunks_received: u64,
    pub structured_received: u64,
    pub sensor_rows_received: u64,
    pub raw_received: u64,
    pub frames_sent: u64,
    pub checksum_failures: u64,
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MessageRouter {
    assembler: LineAssembler,
    csv: CsvFeed,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification chunk; returns the lines it completed, classified
    pub fn ingest(&mut self, chunk: &[u8]) -> SmallVec<[Dispatch; 4]> {
        self.stats.chunks_received += 1;
        self.assembler
            .push(chunk)
            .into_iter()
            .map(|line| self.classify(&line))
            .collect()
    }

    /// Classify one complete line
    pub fn classify(&mut self, line: &str) -> Dispatch {
        match Inbound::from_line(line) {
            Inbound::Structured(message) => {
                self.stats.structured_received += 1;
                if let Err(e) = message.verify_checksum() {
                    self.stats.checksum_failures += 1;
                    warn!("{} message failed checksum: {}", message.kind(), e);
                }
                trace!("Inbound {} for session '{}'", message.kind(), message.session_id());
                dispatch_for(message)
            }
            Inbound::Raw(text) => match self.csv.classify(&text) {
                CsvLine::Header => {
                    debug!("CSV header: {}", text);
                    Dispatch::CsvHeader
                }
                CsvLine::Row(reading) => {
                    self.stats.sensor_rows_received += 1;
                    Dispatch::Sensor(reading)
                }
                CsvLine::Unrecognized => {
                    self.stats.raw_received += 1;
                    Dispatch::Raw(text)
                }
            },
        }
    }

    /// Frame `message` and hand it to the link for chunked transmission
    pub fn send(&mut self, message: &StructuredMessage, link: &mut LinkManager) -> Result<()> {
        link.send(message.encode_frame())?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Drop partial lines and CSV header state; called on disconnect
    pub fn reset(&mut self) {
        self.assembler.reset();
        self.csv.reset();
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}
