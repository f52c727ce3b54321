//! Structured message envelope
//!
//! Every structured exchange is a flat JSON object
//! `{"type", "timestamp", "sessionId", "payload", "checksum"?}` terminated by a
//! newline. Inbound text that does not decode as an envelope is surfaced as
//! [`Inbound::Raw`] instead of an error.

use core::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ProtocolError;
use crate::protocol::constants::LINE_TERMINATOR;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Message Type
// ----------------------------------------------------------------------------

/// Type tag of a structured message
///
/// Unknown tags are preserved verbatim in [`MessageType::Other`] so they can be
/// forwarded to observers untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Ping,
    Pong,
    TimeSyncRequest,
    TimeSyncResponse,
    Data,
    Ack,
    SyncStart,
    SyncStop,
    SyncAck,
    SyncData,
    SyncError,
    Heartbeat,
    VideoChange,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::TimeSyncRequest => "TIME_SYNC_REQUEST",
            MessageType::TimeSyncResponse => "TIME_SYNC_RESPONSE",
            MessageType::Data => "DATA",
            MessageType::Ack => "ACK",
            MessageType::SyncStart => "SYNC_START",
            MessageType::SyncStop => "SYNC_STOP",
            MessageType::SyncAck => "SYNC_ACK",
            MessageType::SyncData => "SYNC_DATA",
            MessageType::SyncError => "SYNC_ERROR",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::VideoChange => "VIDEO_CHANGE",
            MessageType::Other(other) => other,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PING" => MessageType::Ping,
            "PONG" => MessageType::Pong,
            "TIME_SYNC_REQUEST" => MessageType::TimeSyncRequest,
            "TIME_SYNC_RESPONSE" => MessageType::TimeSyncResponse,
            "DATA" => MessageType::Data,
            "ACK" => MessageType::Ack,
            "SYNC_START" => MessageType::SyncStart,
            "SYNC_STOP" => MessageType::SyncStop,
            "SYNC_ACK" => MessageType::SyncAck,
            "SYNC_DATA" => MessageType::SyncData,
            "SYNC_ERROR" => MessageType::SyncError,
            "HEARTBEAT" => MessageType::Heartbeat,
            "VIDEO_CHANGE" => MessageType::VideoChange,
            _ => MessageType::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Structured Message
// ----------------------------------------------------------------------------

/// Flat keyed envelope exchanged over the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMessage {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default)]
    timestamp: String,
    #[serde(rename = "sessionId", default)]
    session_id: String,
    #[serde(default)]
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl StructuredMessage {
    /// Build a message stamped with `at`
    pub fn new(
        kind: MessageType,
        session_id: impl Into<String>,
        payload: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            kind,
            timestamp: at.to_iso8601(),
            session_id: session_id.into(),
            payload: payload.into(),
            checksum: None,
        }
    }

    /// Build a message whose payload is the JSON encoding of `payload`
    pub fn with_json_payload<P: Serialize>(
        kind: MessageType,
        session_id: impl Into<String>,
        payload: &P,
        at: Timestamp,
    ) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_string(payload).map_err(|e| ProtocolError::MalformedPayload {
            kind: kind.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(kind, session_id, payload, at))
    }

    /// Attach a CRC32 checksum of the payload
    pub fn with_checksum(mut self) -> Self {
        self.checksum = Some(payload_checksum(&self.payload));
        self
    }

    pub fn kind(&self) -> &MessageType {
        &self.kind
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Check the checksum if one is present
    pub fn verify_checksum(&self) -> Result<(), ProtocolError> {
        match &self.checksum {
            None => Ok(()),
            Some(expected) => {
                let actual = payload_checksum(&self.payload);
                if expected.eq_ignore_ascii_case(&actual) {
                    Ok(())
                } else {
                    Err(ProtocolError::ChecksumMismatch {
                        expected: expected.clone(),
                        actual,
                    })
                }
            }
        }
    }

    /// Decode the payload as JSON into `P`
    pub fn decode_payload<P: for<'de> Deserialize<'de>>(&self) -> Result<P, ProtocolError> {
        serde_json::from_str(&self.payload).map_err(|e| ProtocolError::MalformedPayload {
            kind: self.kind.to_string(),
            reason: e.to_string(),
        })
    }

    /// JSON text of the envelope, without terminator
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Wire frame: JSON followed by the line terminator
    pub fn encode_frame(&self) -> Vec<u8> {
        let mut frame = self.to_json().into_bytes();
        frame.push(LINE_TERMINATOR);
        frame
    }

    /// Decode a single line of text as an envelope
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return Err(ProtocolError::MalformedEnvelope {
                reason: "not a JSON object".to_string(),
            });
        }
        serde_json::from_str(trimmed).map_err(|e| ProtocolError::MalformedEnvelope {
            reason: e.to_string(),
        })
    }
}

fn payload_checksum(payload: &str) -> String {
    hex::encode(crc32fast::hash(payload.as_bytes()).to_be_bytes())
}

// ----------------------------------------------------------------------------
// Inbound Classification
// ----------------------------------------------------------------------------

/// One complete inbound line after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Structured(StructuredMessage),
    Raw(String),
}

impl Inbound {
    /// Decode a line, degrading to [`Inbound::Raw`] on failure
    pub fn from_line(line: &str) -> Self {
        match StructuredMessage::decode(line) {
            Ok(message) => Inbound::Structured(message),
            Err(e) => {
                if line.trim_start().starts_with('{') {
                    debug!("Delivering undecodable frame as raw text: {}", e);
                }
                Inbound::Raw(line.to_string())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
