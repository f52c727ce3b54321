//! WristSync Runtime
//!
//! The headset side of the sync protocol:
//! - [`link`] - connection state machine with attempt supersession and timeouts
//! - [`router`] - line reassembly and message dispatch
//! - [`time_sync`] - round-trip clock offset estimation
//! - [`heartbeat`] - liveness probing and reconnect backoff
//! - [`session`] - session handshake, ids and the sync event log
//! - [`engine`] - the single owner that composes all of the above
//! - [`runtime`] - tokio tasks and channels around the engine
//!
//! [`simulated`] provides an in-process companion used by tests and the CLI's
//! `--simulate` mode.

pub mod clock;
pub mod engine;
pub mod heartbeat;
pub mod link;
pub mod preferences;
pub mod recorder;
pub mod router;
pub mod runtime;
pub mod session;
pub mod simulated;
pub mod time_sync;

pub use clock::TokioTimeSource;
pub use engine::{SyncEngine, SyncStatus};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor, LatencySample};
pub use link::{normalize_address, LinkEvent, LinkManager};
pub use preferences::{Preferences, PreferencesError};
pub use recorder::{LoggingRecorder, MemoryRecorder, Recorder, RecorderCall};
pub use router::{Dispatch, MessageRouter};
pub use runtime::{SyncHandle, SyncRuntime};
pub use session::{SessionCoordinator, SessionPhase, SessionRecord, SyncEventLog};
pub use simulated::{
    ConnectBehavior, SimulatedCompanion, SimulatedLink, SimulatedLinkConfig, SimulatedLinkHandle,
};
pub use time_sync::{ClockEstimate, TimeSyncEngine};

// Re-export core types for convenience
pub use wristsync_core::{
    Command, LinkState, RadioEffect, RadioEvent, Result, SyncConfig, SyncError, SyncEvent,
};
