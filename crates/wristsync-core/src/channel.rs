//! Typed channel messages between the application, the sync engine and radios
//!
//! - [`Command`]: application → engine
//! - [`RadioEvent`]: radio task → engine (the bounded inbound queue)
//! - [`RadioEffect`]: engine → radio task
//! - [`SyncEvent`]: engine → observers (broadcast)

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::config::ChannelConfig;
use crate::errors::{SyncError, TransportError};
use crate::protocol::{SensorReading, StructuredMessage};
use crate::types::LinkState;

// ----------------------------------------------------------------------------
// Command: Application → Engine
// ----------------------------------------------------------------------------

/// Requests from the application to the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Scan for companions advertising the sync service
    StartScan,
    StopScan,
    /// Connect to `address`, or to the remembered companion when `None`
    Connect { address: Option<String> },
    Disconnect,
    /// Begin a recording session
    StartSession { label: String, metadata: String },
    /// End the active recording session
    EndSession { reason: String },
    /// Change the label the recorder files data under
    SetActiveLabel { label: Option<String> },
    /// Trigger a time sync round trip
    RequestTimeSync,
    /// Send an arbitrary structured message
    Send(StructuredMessage),
    Shutdown,
}

// ----------------------------------------------------------------------------
// Radio Event: Radio Task → Engine
// ----------------------------------------------------------------------------

/// Notifications raised in the radio callback context
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    DeviceFound {
        address: String,
        name: Option<String>,
        rssi: Option<i16>,
    },
    ScanStopped,
    /// Physical connection confirmed for `attempt`
    Connected { attempt: u64 },
    /// Services discovered and data characteristic subscribed for `attempt`
    Subscribed { attempt: u64 },
    ConnectFailed { attempt: u64, error: TransportError },
    /// Raw notification bytes
    Data(Vec<u8>),
    Disconnected { reason: String },
    WriteFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Radio Effect: Engine → Radio Task
// ----------------------------------------------------------------------------

/// Side effects the engine asks the radio to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEffect {
    StartScan,
    StopScan,
    Connect { address: String, attempt: u64 },
    /// Discover services and subscribe to the data characteristic
    Discover { attempt: u64 },
    /// Write a frame; the radio chunks it to its maximum payload
    Write { data: Vec<u8> },
    Disconnect,
}

// ----------------------------------------------------------------------------
// Sync Event: Engine → Observers
// ----------------------------------------------------------------------------

/// Everything observers can learn about the link and sessions
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    LinkStateChanged { from: LinkState, to: LinkState },
    DeviceFound { address: String, name: Option<String> },
    Connected { address: String },
    Disconnected { address: String, reason: String },
    ClockOffset {
        offset_secs: f64,
        round_trip_ms: i64,
        within_threshold: bool,
    },
    Latency { latency_ms: u64, average_ms: f64 },
    LinkLost { silent_ms: u64 },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    ReconnectExhausted { attempts: u32 },
    /// Structured message with no dedicated handler
    Message(StructuredMessage),
    /// `DATA` message
    DataMessage(StructuredMessage),
    /// Line that is neither an envelope nor a sensor row
    RawMessage(String),
    Sensor(SensorReading),
    SessionStarted {
        session_id: String,
        label: String,
        peer_synced: bool,
    },
    SessionEnded { session_id: String, reason: String },
    SessionFailed { session_id: String, attempts: u32 },
    /// Session continues locally without the companion
    SessionDegraded { session_id: String },
    PeerNotReady { session_id: String, status: String },
    Error(SyncError),
}

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type RadioEventReceiver = mpsc::Receiver<RadioEvent>;
pub type EffectSender = mpsc::Sender<RadioEffect>;
pub type EffectReceiver = mpsc::Receiver<RadioEffect>;
pub type SyncEventSender = broadcast::Sender<SyncEvent>;
pub type SyncEventReceiver = broadcast::Receiver<SyncEvent>;

/// Slots at the tail of the inbound queue kept free for link control events
pub const CONTROL_RESERVE: usize = 8;

/// Producer side of the inbound queue, held by the radio task
///
/// Sends never block the radio callback context. Under pressure `Data` and
/// `DeviceFound` are dropped once only the control reserve is left; state
/// changes such as `Subscribed` or `Disconnected` still use the reserve.
#[derive(Debug, Clone)]
pub struct RadioEventSender {
    inner: mpsc::Sender<RadioEvent>,
}

impl RadioEventSender {
    pub fn new(inner: mpsc::Sender<RadioEvent>) -> Self {
        Self { inner }
    }

    /// Enqueue without blocking
    pub fn send(&self, event: RadioEvent) -> Result<(), SyncError> {
        if self.inner.is_closed() {
            return Err(closed());
        }
        if is_droppable(&event) && self.inner.capacity() <= CONTROL_RESERVE {
            warn!("Inbound radio queue full, dropping {}", event_kind(&event));
            return Ok(());
        }
        match self.inner.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Inbound radio queue reserve exhausted, dropping {}",
                    event_kind(&event)
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(closed()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

fn closed() -> SyncError {
    SyncError::Channel {
        reason: "inbound radio queue closed".to_string(),
    }
}

/// Traffic that may be shed; everything else changes link state
fn is_droppable(event: &RadioEvent) -> bool {
    matches!(event, RadioEvent::Data(_) | RadioEvent::DeviceFound { .. })
}

fn event_kind(event: &RadioEvent) -> &'static str {
    match event {
        RadioEvent::DeviceFound { .. } => "DeviceFound",
        RadioEvent::ScanStopped => "ScanStopped",
        RadioEvent::Connected { .. } => "Connected",
        RadioEvent::Subscribed { .. } => "Subscribed",
        RadioEvent::ConnectFailed { .. } => "ConnectFailed",
        RadioEvent::Data(_) => "Data",
        RadioEvent::Disconnected { .. } => "Disconnected",
        RadioEvent::WriteFailed { .. } => "WriteFailed",
    }
}

pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

pub fn create_radio_event_channel(config: &ChannelConfig) -> (RadioEventSender, RadioEventReceiver) {
    let (tx, rx) = mpsc::channel(config.radio_event_buffer_size + CONTROL_RESERVE);
    (RadioEventSender::new(tx), rx)
}

pub fn create_effect_channel(config: &ChannelConfig) -> (EffectSender, EffectReceiver) {
    mpsc::channel(config.effect_buffer_size)
}

pub fn create_sync_event_channel(config: &ChannelConfig) -> SyncEventSender {
    let (tx, _rx) = broadcast::channel(config.event_buffer_size);
    tx
}
