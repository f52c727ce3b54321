//! Companion replies to headset commands
//!
//! Answers liveness probes, time sync requests and the session handshake.
//! `clock_skew_ms` shifts the companion's clock, which lets simulations
//! exercise offset estimation.

use tracing::{debug, info, warn};

use crate::protocol::commands::{
    SyncAcknowledgment, SyncStartCommand, SyncStopCommand, TimeSyncRequest, TimeSyncResponse,
    VideoChangeCommand,
};
use crate::protocol::message::{MessageType, StructuredMessage};
use crate::types::Timestamp;

#[derive(Debug, Clone)]
pub struct CompanionResponder {
    ready: bool,
    clock_skew_ms: i64,
    active_session: Option<String>,
    active_label: Option<String>,
}

impl Default for CompanionResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanionResponder {
    pub fn new() -> Self {
        Self {
            ready: true,
            clock_skew_ms: 0,
            active_session: None,
            active_label: None,
        }
    }

    pub fn with_clock_skew(mut self, skew_ms: i64) -> Self {
        self.clock_skew_ms = skew_ms;
        self
    }

    /// Whether SYNC_START is acknowledged with `ready=true`
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active_session.as_deref()
    }

    pub fn active_label(&self) -> Option<&str> {
        self.active_label.as_deref()
    }

    fn device_time(&self, now: Timestamp) -> i64 {
        now.as_signed_millis() + self.clock_skew_ms
    }

    /// Reply to `message`, if it calls for one
    pub fn respond(&mut self, message: &StructuredMessage, now: Timestamp) -> Option<StructuredMessage> {
        match message.kind() {
            MessageType::Ping => Some(StructuredMessage::new(
                MessageType::Pong,
                message.session_id(),
                message.payload(),
                now,
            )),
            MessageType::TimeSyncRequest => {
                let request: TimeSyncRequest = match message.decode_payload() {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Ignoring time sync request: {}", e);
                        return None;
                    }
                };
                let device_time = self.device_time(now);
                let response = TimeSyncResponse {
                    device_timestamp: device_time,
                    received_timestamp: i64::try_from(request.timestamp).unwrap_or(i64::MAX),
                    sent_timestamp: device_time,
                };
                StructuredMessage::with_json_payload(
                    MessageType::TimeSyncResponse,
                    message.session_id(),
                    &response,
                    now,
                )
                .ok()
            }
            MessageType::SyncStart => {
                let command: SyncStartCommand = match message.decode_payload() {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Ignoring malformed SYNC_START: {}", e);
                        return None;
                    }
                };
                let status = if self.ready {
                    info!("Companion joined session {}", command.session_id);
                    self.active_session = Some(command.session_id.clone());
                    self.active_label = Some(command.video_name.clone());
                    "RECORDING"
                } else {
                    "NOT_READY"
                };
                let ack = SyncAcknowledgment::new(
                    command.session_id.clone(),
                    self.device_time(now),
                    self.ready,
                    status,
                );
                StructuredMessage::with_json_payload(MessageType::SyncAck, command.session_id, &ack, now)
                    .ok()
            }
            MessageType::SyncStop => {
                if let Ok(command) = message.decode_payload::<SyncStopCommand>() {
                    if self.active_session.as_deref() == Some(command.session_id.as_str()) {
                        info!("Companion left session {} ({})", command.session_id, command.reason);
                        self.active_session = None;
                        self.active_label = None;
                    }
                }
                Some(StructuredMessage::new(
                    MessageType::Ack,
                    message.session_id(),
                    MessageType::SyncStop.as_str(),
                    now,
                ))
            }
            MessageType::VideoChange => {
                if let Ok(change) = message.decode_payload::<VideoChangeCommand>() {
                    self.active_label = Some(change.video_name);
                }
                None
            }
            other => {
                debug!("Companion ignoring {}", other);
                None
            }
        }
    }

    /// Periodic HEARTBEAT for the joined session
    pub fn heartbeat(&self, now: Timestamp) -> Option<StructuredMessage> {
        self.active_session.as_ref().map(|session| {
            StructuredMessage::new(
                MessageType::Heartbeat,
                session.clone(),
                self.device_time(now).to_string(),
                now,
            )
        })
    }
}
