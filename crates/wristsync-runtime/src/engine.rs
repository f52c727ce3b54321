//! Sync Engine
//!
//! Single owner of every protocol state machine. All commands and radio events
//! are applied here, one at a time, so no component ever observes another
//! mid-update. The engine performs no I/O: radio work leaves as
//! [`RadioEffect`]s and observers learn about changes through [`SyncEvent`]s.

use serde::Serialize;
use tracing::{debug, info, trace, warn};
use wristsync_core::channel::{SyncEventReceiver, SyncEventSender};
use wristsync_core::{
    Command, LinkState, MessageType, RadioEffect, RadioEvent, Result, StructuredMessage,
    SyncConfig, SyncError, SyncEvent, TimeSource, Timestamp, TransportError,
};

use crate::heartbeat::{HeartbeatAction, HeartbeatActions, HeartbeatMonitor};
use crate::link::{LinkEvent, LinkManager};
use crate::recorder::Recorder;
use crate::router::{Dispatch, MessageRouter};
use crate::session::{SessionContext, SessionCoordinator, SessionOutput, SessionPhase};
use crate::time_sync::TimeSyncEngine;

/// Point-in-time view for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub link_state: LinkState,
    pub address: Option<String>,
    pub session_phase: SessionPhase,
    pub session_id: Option<String>,
    /// `Disconnected`, `Idle`, `Synchronized` or `Local Only`
    pub status_text: String,
    pub peer_synced: bool,
    pub clock_offset_secs: Option<f64>,
    pub average_latency_ms: f64,
    pub reconnecting: bool,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            link_state: LinkState::Idle,
            address: None,
            session_phase: SessionPhase::Idle,
            session_id: None,
            status_text: "Disconnected".to_string(),
            peer_synced: false,
            clock_offset_secs: None,
            average_latency_ms: 0.0,
            reconnecting: false,
            successful_syncs: 0,
            failed_syncs: 0,
        }
    }
}

pub struct SyncEngine<T: TimeSource> {
    time_source: T,
    sync_on_connect: bool,
    link: LinkManager,
    router: MessageRouter,
    time_sync: TimeSyncEngine,
    heartbeat: HeartbeatMonitor,
    sessions: SessionCoordinator,
    events: SyncEventSender,
    effects: Vec<RadioEffect>,
    running: bool,
}

impl<T: TimeSource> SyncEngine<T> {
    pub fn new(
        config: &SyncConfig,
        time_source: T,
        recorder: Box<dyn Recorder>,
        events: SyncEventSender,
    ) -> Self {
        Self {
            time_source,
            sync_on_connect: config.time_sync.sync_on_connect,
            link: LinkManager::new(config.link.clone()),
            router: MessageRouter::new(),
            time_sync: TimeSyncEngine::new(config.time_sync.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            sessions: SessionCoordinator::new(config.session.clone(), recorder),
            events,
            effects: Vec::new(),
            running: true,
        }
    }

    /// Remembered companion used by address-less connects
    pub fn set_companion_address(&mut self, address: Option<String>) {
        self.link.set_companion_address(address);
    }

    pub fn subscribe(&self) -> SyncEventReceiver {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    pub fn handle_command(&mut self, command: Command) -> Result<()> {
        let now = self.time_source.now();
        trace!("Command {:?}", command);
        let result = match command {
            Command::StartScan => self.link.start_scan(now),
            Command::StopScan => {
                self.link.stop_scan(now);
                Ok(())
            }
            Command::Connect { address } => {
                self.heartbeat.cancel_reconnect();
                self.link.connect(address.as_deref(), now)
            }
            Command::Disconnect => {
                self.heartbeat.cancel_reconnect();
                self.link.disconnect(now);
                Ok(())
            }
            Command::StartSession { label, metadata } => {
                let ctx = self.context(now);
                self.sessions
                    .start_session(&label, &metadata, &ctx)
                    .map(|_| ())
            }
            Command::EndSession { reason } => {
                let ctx = self.context(now);
                self.sessions.end_session(&reason, &ctx)
            }
            Command::SetActiveLabel { label } => {
                let ctx = self.context(now);
                self.sessions.set_active_label(label.as_deref(), &ctx);
                Ok(())
            }
            Command::RequestTimeSync => self.request_time_sync(now),
            Command::Send(message) => self.send_message(&message),
            Command::Shutdown => {
                info!("Sync engine shutting down");
                self.running = false;
                self.heartbeat.cancel_reconnect();
                self.link.disconnect(now);
                Ok(())
            }
        };
        self.settle(now);
        result
    }

    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        let now = self.time_source.now();
        match event {
            RadioEvent::Data(bytes) => {
                self.heartbeat.on_inbound(now);
                for dispatch in self.router.ingest(&bytes) {
                    self.dispatch(dispatch, now);
                }
            }
            RadioEvent::WriteFailed { reason } => {
                warn!("Write failed: {}", reason);
                self.publish(SyncEvent::Error(
                    TransportError::WriteFailed { reason }.into(),
                ));
            }
            other => self.link.handle_radio_event(&other, now),
        }
        self.settle(now);
    }

    /// Advance every timer
    pub fn poll(&mut self) {
        let now = self.time_source.now();
        self.link.poll(now);
        let actions = self.heartbeat.poll(now);
        self.apply_heartbeat(actions, now);
        let ctx = self.context(now);
        self.sessions.poll(&ctx);
        self.settle(now);
    }

    /// Surface an error raised outside the engine's own handlers
    pub fn report_error(&self, error: SyncError) {
        self.publish(SyncEvent::Error(error));
    }

    /// Effects produced since the last call, in order
    pub fn take_effects(&mut self) -> Vec<RadioEffect> {
        std::mem::take(&mut self.effects)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn status(&self) -> SyncStatus {
        let connected = self.link.is_connected();
        let stats = self.sessions.stats();
        SyncStatus {
            link_state: self.link.state(),
            address: self.link.address().map(str::to_string),
            session_phase: self.sessions.phase(),
            session_id: self.sessions.session_id().map(str::to_string),
            status_text: self.sessions.status_text(connected).to_string(),
            peer_synced: self.sessions.is_peer_synced(),
            clock_offset_secs: self.time_sync.estimate().map(|e| e.offset_secs),
            average_latency_ms: self.heartbeat.average_latency_ms(),
            reconnecting: self.heartbeat.is_recovering(),
            successful_syncs: stats.successful_syncs,
            failed_syncs: stats.failed_syncs,
        }
    }

    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    pub fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn time_sync(&self) -> &TimeSyncEngine {
        &self.time_sync
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn context(&self, now: Timestamp) -> SessionContext {
        SessionContext::new(now, self.link.is_connected())
            .with_headset_time(self.time_sync.synchronized_timestamp(now))
    }

    fn publish(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            trace!("No observers for sync event");
        }
    }

    fn send_message(&mut self, message: &StructuredMessage) -> Result<()> {
        self.router.send(message, &mut self.link)
    }

    fn request_time_sync(&mut self, now: Timestamp) -> Result<()> {
        if !self.link.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let session_id = self.sessions.session_id().unwrap_or_default().to_string();
        let request = self.time_sync.request_sync(&session_id, now)?;
        self.send_message(&request)
    }

    fn dispatch(&mut self, dispatch: Dispatch, now: Timestamp) {
        match dispatch {
            Dispatch::Latency(message) => {
                if let Some(sample) = self.heartbeat.on_pong(message.payload(), now) {
                    self.publish(SyncEvent::Latency {
                        latency_ms: sample.latency_ms,
                        average_ms: sample.average_ms,
                    });
                }
            }
            Dispatch::Offset(message) => match self.time_sync.handle_response(&message, now) {
                Ok(estimate) => self.publish(SyncEvent::ClockOffset {
                    offset_secs: estimate.offset_secs,
                    round_trip_ms: estimate.round_trip_ms,
                    within_threshold: estimate.within_threshold,
                }),
                Err(e) => {
                    warn!("Bad time sync response: {}", e);
                    self.publish(SyncEvent::Error(e.into()));
                }
            },
            Dispatch::Data(message) => self.publish(SyncEvent::DataMessage(message)),
            Dispatch::Ack(message) => {
                debug!("ACK for session '{}': {}", message.session_id(), message.payload());
            }
            Dispatch::Structured(message) => {
                let ctx = self.context(now);
                match message.kind() {
                    MessageType::SyncAck => self.sessions.on_sync_ack(&message, &ctx),
                    MessageType::Heartbeat => self.sessions.on_peer_heartbeat(&message, &ctx),
                    MessageType::SyncError => self.sessions.on_sync_error(&message, &ctx),
                    MessageType::Ping => {
                        let pong = StructuredMessage::new(
                            MessageType::Pong,
                            message.session_id(),
                            message.payload(),
                            now,
                        );
                        if let Err(e) = self.send_message(&pong) {
                            debug!("Could not answer PING: {}", e);
                        }
                    }
                    _ => {}
                }
                self.publish(SyncEvent::Message(message));
            }
            Dispatch::CsvHeader => debug!("Sensor stream header received"),
            Dispatch::Sensor(reading) => self.publish(SyncEvent::Sensor(reading)),
            Dispatch::Raw(text) => self.publish(SyncEvent::RawMessage(text)),
        }
    }

    fn apply_heartbeat(&mut self, actions: HeartbeatActions, now: Timestamp) {
        for action in actions {
            match action {
                HeartbeatAction::SendPing { ping_id } => {
                    let session_id = self.sessions.session_id().unwrap_or_default().to_string();
                    let ping =
                        StructuredMessage::new(MessageType::Ping, session_id, ping_id.to_string(), now);
                    if let Err(e) = self.send_message(&ping) {
                        debug!("Could not send PING: {}", e);
                    }
                }
                HeartbeatAction::LinkLost { silent_ms } => {
                    self.publish(SyncEvent::LinkLost { silent_ms });
                    self.link.mark_lost("heartbeat timeout", now);
                }
                HeartbeatAction::ReconnectScheduled { attempt, delay } => {
                    info!("Reconnect {} scheduled in {:?}", attempt, delay);
                    self.publish(SyncEvent::ReconnectScheduled {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                }
                HeartbeatAction::Reconnect { attempt } => {
                    let target = self.link.address().map(str::to_string);
                    if let Err(e) = self.link.connect(target.as_deref(), now) {
                        warn!("Reconnect attempt {} could not start: {}", attempt, e);
                        let next = self.heartbeat.on_reconnect_failed(now);
                        self.apply_heartbeat(next, now);
                    }
                }
                HeartbeatAction::ReconnectExhausted { attempts } => {
                    self.publish(SyncEvent::ReconnectExhausted { attempts });
                    let ctx = self.context(now);
                    self.sessions.on_reconnect_exhausted(&ctx);
                }
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent, now: Timestamp) {
        match event {
            LinkEvent::StateChanged { from, to } => {
                self.publish(SyncEvent::LinkStateChanged { from, to });
            }
            LinkEvent::DeviceFound { address, name } => {
                self.publish(SyncEvent::DeviceFound { address, name });
            }
            LinkEvent::Connected { address } => {
                self.heartbeat.on_connected(now);
                self.publish(SyncEvent::Connected { address });
                if self.sync_on_connect {
                    if let Err(e) = self.request_time_sync(now) {
                        warn!("Initial time sync failed: {}", e);
                    }
                }
            }
            LinkEvent::Disconnected {
                address,
                reason,
                initiated_locally,
            } => {
                self.router.reset();
                let actions = self.heartbeat.on_disconnected(now, initiated_locally);
                let ctx = self.context(now);
                self.sessions.on_link_lost(&ctx);
                self.publish(SyncEvent::Disconnected { address, reason });
                self.apply_heartbeat(actions, now);
            }
            LinkEvent::ConnectFailed { address, error } => {
                warn!("Connect to {} failed: {}", address, error);
                self.publish(SyncEvent::Error(error.into()));
                let actions = self.heartbeat.on_reconnect_failed(now);
                self.apply_heartbeat(actions, now);
            }
        }
    }

    /// Drain link events and session outputs until both are quiet
    fn settle(&mut self, now: Timestamp) {
        loop {
            let link_events = self.link.take_events();
            let outputs = self.sessions.take_outputs();
            if link_events.is_empty() && outputs.is_empty() {
                break;
            }
            for event in link_events {
                self.on_link_event(event, now);
            }
            for output in outputs {
                match output {
                    SessionOutput::Send(message) => {
                        if let Err(e) = self.send_message(&message) {
                            debug!("Dropping {} while disconnected: {}", message.kind(), e);
                        }
                    }
                    SessionOutput::Event(event) => self.publish(event),
                }
            }
        }
        self.effects.extend(self.link.take_effects());
    }
}

impl<T: TimeSource> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("link_state", &self.link.state())
            .field("sessions", &self.sessions)
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use wristsync_core::channel::create_sync_event_channel;
    use wristsync_core::protocol::{SyncAcknowledgment, TimeSyncRequest, TimeSyncResponse};
    use wristsync_core::testing::MockTimeSource;
    use wristsync_core::ChannelConfig;

    fn engine() -> (SyncEngine<MockTimeSource>, MockTimeSource, SyncEventReceiver) {
        let clock = MockTimeSource::new_at(1_700_000_000_000);
        let mut config = SyncConfig::testing();
        config.session.device_seed = Some("0badf00d".into());
        let events = create_sync_event_channel(&ChannelConfig::testing());
        let rx = events.subscribe();
        let engine = SyncEngine::new(&config, clock.clone(), Box::new(MemoryRecorder::new()), events);
        (engine, clock, rx)
    }

    fn connect(engine: &mut SyncEngine<MockTimeSource>) {
        engine
            .handle_command(Command::Connect {
                address: Some("aa:bb".into()),
            })
            .unwrap();
        let attempt = engine.link().current_attempt();
        engine.handle_radio_event(RadioEvent::Connected { attempt });
        engine.handle_radio_event(RadioEvent::Subscribed { attempt });
        assert!(engine.link().is_connected());
    }

    fn written(effects: &[RadioEffect]) -> Vec<StructuredMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                RadioEffect::Write { data } => {
                    StructuredMessage::decode(std::str::from_utf8(data).ok()?.trim()).ok()
                }
                _ => None,
            })
            .collect()
    }

    fn drain(rx: &mut SyncEventReceiver) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn connect_flow_requests_time_sync() {
        let (mut engine, _clock, mut rx) = engine();
        connect(&mut engine);
        let effects = engine.take_effects();
        assert!(matches!(effects[0], RadioEffect::Connect { ref address, attempt: 1 } if address == "AA:BB"));
        assert!(effects.contains(&RadioEffect::Discover { attempt: 1 }));
        let sent = written(&effects);
        assert_eq!(sent[0].kind(), &MessageType::TimeSyncRequest);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::Connected { address } if address == "AA:BB")));
    }

    #[test]
    fn time_sync_response_updates_offset() {
        let (mut engine, clock, mut rx) = engine();
        connect(&mut engine);
        let request = written(&engine.take_effects()).remove(0);
        let body: TimeSyncRequest = request.decode_payload().unwrap();

        clock.advance(40);
        let response = StructuredMessage::with_json_payload(
            MessageType::TimeSyncResponse,
            "",
            &TimeSyncResponse {
                device_timestamp: body.timestamp as i64 + 100,
                received_timestamp: body.timestamp as i64,
                sent_timestamp: body.timestamp as i64 + 100,
            },
            clock.now(),
        )
        .unwrap();
        engine.handle_radio_event(RadioEvent::Data(response.encode_frame()));

        // (100 - 40 + 20) / 1000
        let offset = engine.status().clock_offset_secs.unwrap();
        assert!((offset - 0.08).abs() < 1e-9);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::ClockOffset { round_trip_ms: 40, .. })));
    }

    #[test]
    fn session_handshake_through_engine() {
        let (mut engine, clock, mut rx) = engine();
        connect(&mut engine);
        engine.take_effects();

        engine
            .handle_command(Command::StartSession {
                label: "intro.mp4".into(),
                metadata: "{}".into(),
            })
            .unwrap();
        let start = written(&engine.take_effects()).remove(0);
        assert_eq!(start.kind(), &MessageType::SyncStart);
        assert!(start.session_id().starts_with("VR_"));

        clock.advance(50);
        let ack = StructuredMessage::with_json_payload(
            MessageType::SyncAck,
            start.session_id(),
            &SyncAcknowledgment::new(start.session_id(), 0, true, "RECORDING"),
            clock.now(),
        )
        .unwrap();
        engine.handle_radio_event(RadioEvent::Data(ack.encode_frame()));

        let status = engine.status();
        assert_eq!(status.session_phase, SessionPhase::Synchronized);
        assert_eq!(status.status_text, "Synchronized");
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::SessionStarted { peer_synced: true, .. })));
    }

    #[test]
    fn peer_ping_is_answered() {
        let (mut engine, clock, _rx) = engine();
        connect(&mut engine);
        engine.take_effects();
        let ping = StructuredMessage::new(MessageType::Ping, "", "abc", clock.now());
        engine.handle_radio_event(RadioEvent::Data(ping.encode_frame()));
        let sent = written(&engine.take_effects());
        assert_eq!(sent[0].kind(), &MessageType::Pong);
        assert_eq!(sent[0].payload(), "abc");
    }

    #[test]
    fn silence_triggers_link_loss_and_reconnect() {
        let (mut engine, clock, mut rx) = engine();
        connect(&mut engine);
        engine.take_effects();

        // 2s interval, stale after 6s, first reconnect 2s later
        clock.advance(6_001);
        engine.poll();
        assert_eq!(engine.link().state(), LinkState::Idle);
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, SyncEvent::LinkLost { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::ReconnectScheduled { attempt: 1, .. })));
        assert!(engine.status().reconnecting);

        clock.advance(2_000);
        engine.poll();
        assert_eq!(engine.link().state(), LinkState::Connecting);
        assert!(engine
            .take_effects()
            .iter()
            .any(|e| matches!(e, RadioEffect::Connect { attempt: 2, .. })));
    }

    #[test]
    fn commands_fail_cleanly_when_disconnected() {
        let (mut engine, clock, _rx) = engine();
        let message = StructuredMessage::new(MessageType::Data, "", "x", clock.now());
        assert_eq!(
            engine.handle_command(Command::Send(message)),
            Err(TransportError::NotConnected.into())
        );
        assert_eq!(
            engine.handle_command(Command::Connect { address: None }),
            Err(TransportError::NoAddress.into())
        );
        assert_eq!(engine.status().status_text, "Disconnected");
    }

    #[test]
    fn sensor_rows_reach_observers() {
        let (mut engine, _clock, mut rx) = engine();
        connect(&mut engine);
        engine.handle_radio_event(RadioEvent::Data(
            b"Timestamp,HeartRate,RMSSD,SDNN,StressLevel,AccelX,AccelY,AccelZ\n".to_vec(),
        ));
        engine.handle_radio_event(RadioEvent::Data(
            b"10:00:00,72.0,40.00,50.00,Low,0.000,0.000,1.000\n".to_vec(),
        ));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::Sensor(r) if r.heart_rate == Some(72.0))));
    }
}
