//! Error types for companion synchronization
//!
//! Each layer of the sync stack has a dedicated error enum; [`SyncError`]
//! unifies them for callers that do not care which layer failed.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Connect, discovery, subscription and write failures on the radio link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection to {address} timed out after {duration_ms}ms")]
    ConnectTimeout { address: String, duration_ms: u64 },
    #[error("Connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("Service discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
    #[error("Subscription to data characteristic failed: {reason}")]
    SubscriptionFailed { reason: String },
    #[error("Link is not connected")]
    NotConnected,
    #[error("No companion address known")]
    NoAddress,
    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },
    #[error("Scan failed: {reason}")]
    ScanFailed { reason: String },
    #[error("Bluetooth adapter not available")]
    AdapterUnavailable,
}

/// Malformed structured messages or payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed message envelope: {reason}")]
    MalformedEnvelope { reason: String },
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },
    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Session handshake and lifecycle failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Handshake for session {session_id} timed out after {attempts} attempts")]
    HandshakeTimeout { session_id: String, attempts: u32 },
    #[error("Companion not connected and peer confirmation is required")]
    PeerNotConnected,
    #[error("Companion not ready: {status}")]
    PeerNotReady { status: String },
    #[error("Another session operation is in progress")]
    OperationInProgress,
    #[error("No active session")]
    NoActiveSession,
}

/// Heartbeat silence and reconnect exhaustion
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkHealthError {
    #[error("No traffic from companion for {silent_ms}ms")]
    Timeout { silent_ms: u64 },
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Unified error for the sync stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol decode error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Link health error: {0}")]
    LinkHealth(#[from] LinkHealthError),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Channel error: {reason}")]
    Channel { reason: String },
}

impl SyncError {
    /// Errors that should stop the engine rather than be reported and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Channel { .. } | SyncError::Configuration { .. })
    }
}

/// Result type alias for sync operations
pub type Result<T> = core::result::Result<T, SyncError>;
