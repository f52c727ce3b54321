//! Wrist-side companion role
//!
//! [`CompanionState`] is the radio-independent half of the GATT server: it
//! tracks subscribers, reassembles command writes, answers them and produces
//! the periodic CSV rows. The platform module only moves bytes.
//!
//! - Linux: BlueZ GATT application via `bluer`
//! - Other platforms: not supported, `CompanionServer::run` fails

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use wristsync_core::peripheral::{CompanionResponder, Notification, PeripheralNotifier};
use wristsync_core::protocol::{chunk_payload, LineAssembler};
use wristsync_core::{StructuredMessage, Timestamp};

use crate::config::CompanionServerConfig;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::CompanionServer;

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(not(target_os = "linux"))]
pub use fallback::CompanionServer;

// ----------------------------------------------------------------------------
// Sensor Feed
// ----------------------------------------------------------------------------

/// One sensor sample for the companion snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SensorUpdate {
    HeartRate(f32),
    RrInterval(f64),
    Acceleration([f32; 3]),
    StressLevel(Option<String>),
}

/// Cloneable handle that pushes samples into a running companion
#[derive(Debug, Clone)]
pub struct SensorFeed {
    tx: mpsc::UnboundedSender<SensorUpdate>,
}

impl SensorFeed {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SensorUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the companion has stopped
    pub fn push(&self, update: SensorUpdate) -> bool {
        self.tx.send(update).is_ok()
    }
}

// ----------------------------------------------------------------------------
// Companion State
// ----------------------------------------------------------------------------

pub struct CompanionState {
    notifier: PeripheralNotifier,
    responder: CompanionResponder,
    assemblers: HashMap<String, LineAssembler>,
    max_notify_bytes: usize,
}

impl CompanionState {
    pub fn new(config: &CompanionServerConfig) -> Self {
        let mut responder = CompanionResponder::new();
        responder.set_ready(config.ready);
        Self {
            notifier: PeripheralNotifier::new(config.notifier.clone()),
            responder,
            assemblers: HashMap::new(),
            max_notify_bytes: config.notifier.max_notify_bytes,
        }
    }

    /// A central enabled notifications; new subscribers get the header row
    pub fn subscribe(&mut self, peer: &str) -> Vec<Notification> {
        self.notifier.subscribe(peer)
    }

    /// A central opened a notify session
    ///
    /// A session from a peer we still list replaces the old one, whose close
    /// went unnoticed, so the peer starts over and gets the header again.
    pub fn open_session(&mut self, peer: &str) -> Vec<Notification> {
        if self.notifier.subscribers().iter().any(|p| p == peer) {
            debug!("{} reopened its notify session", peer);
            self.unsubscribe(peer);
        }
        self.subscribe(peer)
    }

    pub fn unsubscribe(&mut self, peer: &str) {
        self.notifier.unsubscribe(peer);
        self.assemblers.remove(peer);
    }

    pub fn subscribers(&self) -> &[String] {
        self.notifier.subscribers()
    }

    pub fn apply(&mut self, update: SensorUpdate) {
        match update {
            SensorUpdate::HeartRate(bpm) => self.notifier.update_heart_rate(bpm),
            SensorUpdate::RrInterval(rr_ms) => self.notifier.update_rr_interval(rr_ms),
            SensorUpdate::Acceleration(xyz) => self.notifier.update_acceleration(xyz),
            SensorUpdate::StressLevel(level) => self.notifier.update_stress_level(level),
        }
    }

    /// Bytes written by `peer` to the command characteristic
    ///
    /// Replies go back to the writer only, over the data characteristic.
    pub fn on_write(&mut self, peer: &str, bytes: &[u8], now: Timestamp) -> Vec<Notification> {
        let lines = self
            .assemblers
            .entry(peer.to_string())
            .or_default()
            .push(bytes);

        let mut replies = Vec::new();
        for line in lines {
            let message = match StructuredMessage::decode(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Dropping command from {}: {}", peer, e);
                    continue;
                }
            };
            debug!("Command {} from {}", message.kind(), peer);
            if let Some(reply) = self.responder.respond(&message, now) {
                replies.extend(self.frame_for(peer, &reply));
            }
        }
        replies
    }

    /// Rows due at `now`
    pub fn poll(&mut self, now: Timestamp) -> Vec<Notification> {
        self.notifier.poll(now)
    }

    /// HEARTBEAT to every subscriber while a session is joined
    pub fn heartbeat(&self, now: Timestamp) -> Vec<Notification> {
        let Some(heartbeat) = self.responder.heartbeat(now) else {
            return Vec::new();
        };
        self.notifier
            .subscribers()
            .iter()
            .flat_map(|peer| self.frame_for(peer, &heartbeat))
            .collect()
    }

    pub fn active_session(&self) -> Option<&str> {
        self.responder.active_session()
    }

    pub fn active_label(&self) -> Option<&str> {
        self.responder.active_label()
    }

    pub fn notifier(&self) -> &PeripheralNotifier {
        &self.notifier
    }

    fn frame_for(&self, peer: &str, message: &StructuredMessage) -> Vec<Notification> {
        chunk_payload(&message.encode_frame(), self.max_notify_bytes)
            .map(|chunk| Notification {
                peer: peer.to_string(),
                chunk: chunk.to_vec(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wristsync_core::protocol::commands::SyncStartCommand;
    use wristsync_core::protocol::{LineAssembler, CSV_HEADER};
    use wristsync_core::MessageType;

    const PEER: &str = "11:22:33:44:55:66";

    fn state() -> CompanionState {
        CompanionState::new(&CompanionServerConfig::default())
    }

    fn reassemble(notifications: &[Notification]) -> Vec<String> {
        let mut assembler = LineAssembler::default();
        notifications
            .iter()
            .flat_map(|n| assembler.push(&n.chunk))
            .collect()
    }

    #[test]
    fn new_subscriber_gets_header() {
        let mut state = state();
        let header = state.subscribe(PEER);
        assert_eq!(reassemble(&header), vec![CSV_HEADER.trim_end().to_string()]);
        assert!(state.subscribe(PEER).is_empty());
    }

    #[test]
    fn reopened_session_gets_header_again() {
        let mut state = state();
        assert_eq!(reassemble(&state.open_session(PEER)).len(), 1);
        state.on_write(PEER, b"{\"type\":", Timestamp::new(0));

        let header = state.open_session(PEER);
        assert_eq!(reassemble(&header), vec![CSV_HEADER.trim_end().to_string()]);
        assert_eq!(state.subscribers(), [PEER.to_string()]);
    }

    #[test]
    fn split_ping_is_answered_with_pong() {
        let mut state = state();
        state.subscribe(PEER);
        let frame = StructuredMessage::new(MessageType::Ping, "", "ping-42", Timestamp::new(1))
            .encode_frame();
        let (head, tail) = frame.split_at(10);

        assert!(state.on_write(PEER, head, Timestamp::new(2)).is_empty());
        let replies = state.on_write(PEER, tail, Timestamp::new(3));
        assert!(replies.iter().all(|n| n.peer == PEER));

        let lines = reassemble(&replies);
        let pong = StructuredMessage::decode(&lines[0]).unwrap();
        assert_eq!(pong.kind(), &MessageType::Pong);
        assert_eq!(pong.payload(), "ping-42");
    }

    #[test]
    fn garbage_writes_are_dropped() {
        let mut state = state();
        assert!(state.on_write(PEER, b"not json\n", Timestamp::new(0)).is_empty());
    }

    #[test]
    fn rows_follow_sensor_updates() {
        let mut state = state();
        state.subscribe(PEER);
        state.apply(SensorUpdate::HeartRate(72.0));
        state.apply(SensorUpdate::Acceleration([0.0, 0.0, 1.0]));

        let start = Timestamp::new(0);
        assert!(state.poll(start).is_empty());
        let rows = reassemble(&state.poll(start + Duration::from_secs(10)));
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains(",72.0,"));
        assert!(rows[0].ends_with("0.000,0.000,1.000"));
    }

    #[test]
    fn heartbeat_only_after_session_joined() {
        let mut state = state();
        state.subscribe(PEER);
        assert!(state.heartbeat(Timestamp::new(0)).is_empty());

        let command = SyncStartCommand::new("VR_1", 0, "baseline", "");
        let start =
            StructuredMessage::with_json_payload(MessageType::SyncStart, "VR_1", &command, Timestamp::new(0))
                .unwrap();
        state.on_write(PEER, &start.encode_frame(), Timestamp::new(1));
        assert_eq!(state.active_session(), Some("VR_1"));
        assert_eq!(state.active_label(), Some("baseline"));

        let lines = reassemble(&state.heartbeat(Timestamp::new(2)));
        let heartbeat = StructuredMessage::decode(&lines[0]).unwrap();
        assert_eq!(heartbeat.kind(), &MessageType::Heartbeat);
        assert_eq!(heartbeat.session_id(), "VR_1");
    }

    #[test]
    fn sensor_feed_reports_closed_receiver() {
        let (feed, rx) = SensorFeed::channel();
        assert!(feed.push(SensorUpdate::HeartRate(60.0)));
        drop(rx);
        assert!(!feed.push(SensorUpdate::HeartRate(61.0)));
    }
}
