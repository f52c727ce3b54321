//! Session handshake coordination
//!
//! - [`coordinator`] - start/stop handshake state machine
//! - [`id`] - session id generation
//! - [`log`] - bounded audit trail of sync events

pub mod coordinator;
pub mod id;
pub mod log;

pub use coordinator::{
    SessionContext, SessionCoordinator, SessionOutput, SessionPhase, SessionRecord, SessionStats,
};
pub use id::SessionIdGenerator;
pub use log::{SyncEventKind, SyncEventLog, SyncLogEntry};
