//! Typed payloads carried inside [`StructuredMessage`](super::StructuredMessage) envelopes
//!
//! Payloads are themselves JSON objects serialized into the envelope's
//! `payload` string.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Time Sync
// ----------------------------------------------------------------------------

/// Body of `TIME_SYNC_REQUEST`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncRequest {
    /// Headset epoch milliseconds at send time
    pub timestamp: u64,
}

/// Body of `TIME_SYNC_RESPONSE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncResponse {
    /// Companion clock when the response was produced
    pub device_timestamp: i64,
    /// Headset timestamp echoed from the request
    pub received_timestamp: i64,
    /// Companion clock when the response was sent
    pub sent_timestamp: i64,
}

// ----------------------------------------------------------------------------
// Session Handshake
// ----------------------------------------------------------------------------

/// Body of `SYNC_START`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStartCommand {
    pub command: String,
    pub session_id: String,
    /// Offset-corrected headset epoch milliseconds
    pub headset_time: i64,
    pub video_name: String,
    #[serde(default)]
    pub metadata: String,
}

impl SyncStartCommand {
    pub const COMMAND: &'static str = "SYNC_START";

    pub fn new(
        session_id: impl Into<String>,
        headset_time: i64,
        video_name: impl Into<String>,
        metadata: impl Into<String>,
    ) -> Self {
        Self {
            command: Self::COMMAND.to_string(),
            session_id: session_id.into(),
            headset_time,
            video_name: video_name.into(),
            metadata: metadata.into(),
        }
    }
}

/// Body of `SYNC_STOP`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStopCommand {
    pub command: String,
    pub session_id: String,
    pub headset_time: i64,
    pub reason: String,
}

impl SyncStopCommand {
    pub const COMMAND: &'static str = "SYNC_STOP";

    pub fn new(session_id: impl Into<String>, headset_time: i64, reason: impl Into<String>) -> Self {
        Self {
            command: Self::COMMAND.to_string(),
            session_id: session_id.into(),
            headset_time,
            reason: reason.into(),
        }
    }
}

/// Body of `SYNC_ACK`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAcknowledgment {
    #[serde(default = "SyncAcknowledgment::default_command")]
    pub command: String,
    pub session_id: String,
    #[serde(default)]
    pub watch_time: i64,
    pub ready: bool,
    #[serde(default)]
    pub status: String,
}

impl SyncAcknowledgment {
    pub const COMMAND: &'static str = "SYNC_ACK";

    fn default_command() -> String {
        Self::COMMAND.to_string()
    }

    pub fn new(
        session_id: impl Into<String>,
        watch_time: i64,
        ready: bool,
        status: impl Into<String>,
    ) -> Self {
        Self {
            command: Self::COMMAND.to_string(),
            session_id: session_id.into(),
            watch_time,
            ready,
            status: status.into(),
        }
    }
}

/// Body of `VIDEO_CHANGE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoChangeCommand {
    pub session_id: String,
    pub video_name: String,
    pub headset_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_wire_names() {
        let json =
            serde_json::to_string(&SyncStartCommand::new("VR_1", 42, "intro.mp4", "{}")).unwrap();
        assert!(json.contains(r#""command":"SYNC_START""#));
        assert!(json.contains(r#""sessionId":"VR_1""#));
        assert!(json.contains(r#""headsetTime":42"#));
        assert!(json.contains(r#""videoName":"intro.mp4""#));
    }

    #[test]
    fn ack_tolerates_minimal_fields() {
        let ack: SyncAcknowledgment =
            serde_json::from_str(r#"{"sessionId":"VR_1","ready":false}"#).unwrap();
        assert_eq!(ack.command, "SYNC_ACK");
        assert!(!ack.ready);
        assert_eq!(ack.status, "");
    }

    #[test]
    fn time_sync_response_is_camel_case() {
        let response: TimeSyncResponse = serde_json::from_str(
            r#"{"deviceTimestamp":1000,"receivedTimestamp":900,"sentTimestamp":1001}"#,
        )
        .unwrap();
        assert_eq!(response.device_timestamp, 1000);
        assert_eq!(response.received_timestamp, 900);
    }
}
