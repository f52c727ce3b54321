//! Session Handshake Coordinator
//!
//! Agrees a session id with the companion before recording starts:
//!
//! ```text
//! Idle → Starting → Synchronized | LocalOnly | Failed → Idle
//! ```
//!
//! The coordinator never touches the radio. It queues [`SessionOutput`]s
//! (messages to send, events to publish) which the engine drains after every
//! call, and it reads time and link state from the [`SessionContext`] it is
//! handed.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};
use wristsync_core::protocol::{
    SyncAcknowledgment, SyncStartCommand, SyncStopCommand, VideoChangeCommand,
};
use wristsync_core::{
    MessageType, Result, SessionConfig, SessionError, StructuredMessage, SyncError, SyncEvent,
    Timestamp,
};

use super::id::SessionIdGenerator;
use super::log::{SyncEventKind, SyncEventLog};
use crate::recorder::Recorder;

pub const REASON_NEW_SESSION: &str = "NEW_SESSION_REQUESTED";
pub const REASON_LINK_LOST: &str = "LINK_LOST";
pub const REASON_RECONNECT_EXHAUSTED: &str = "RECONNECT_EXHAUSTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Starting,
    Synchronized,
    LocalOnly,
    Failed,
}

/// The session currently being recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub label: String,
    pub metadata: String,
    pub start_time: Timestamp,
    pub is_active: bool,
    pub is_peer_synced: bool,
}

/// What the coordinator may know about the world for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub now: Timestamp,
    pub link_connected: bool,
    /// Headset time corrected by the clock offset, epoch ms
    pub headset_time: i64,
}

impl SessionContext {
    pub fn new(now: Timestamp, link_connected: bool) -> Self {
        Self {
            now,
            link_connected,
            headset_time: now.as_signed_millis(),
        }
    }

    pub fn with_headset_time(mut self, headset_time: i64) -> Self {
        self.headset_time = headset_time;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    Send(StructuredMessage),
    Event(SyncEvent),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub successful_syncs: u64,
    pub failed_syncs: u64,
}

/// In-flight `SYNC_START`
#[derive(Debug, Clone)]
struct Handshake {
    session_id: String,
    label: String,
    metadata: String,
    attempt: u32,
    /// End of the current attempt's wait for `SYNC_ACK`
    deadline: Timestamp,
    /// Set once an attempt has timed out and another one is due
    resend_at: Option<Timestamp>,
}

pub struct SessionCoordinator {
    config: SessionConfig,
    ids: SessionIdGenerator,
    recorder: Box<dyn Recorder>,
    phase: SessionPhase,
    record: Option<SessionRecord>,
    handshake: Option<Handshake>,
    /// Session id → time the first `SYNC_START` went out
    pending_acks: HashMap<String, Timestamp>,
    log: SyncEventLog,
    stats: SessionStats,
    outputs: Vec<SessionOutput>,
}

impl SessionCoordinator {
    pub fn new(config: SessionConfig, recorder: Box<dyn Recorder>) -> Self {
        let ids = SessionIdGenerator::new(config.session_prefix.clone(), config.device_seed.clone());
        let log = SyncEventLog::new(config.history_capacity);
        Self {
            config,
            ids,
            recorder,
            phase: SessionPhase::Idle,
            record: None,
            handshake: None,
            pending_acks: HashMap::new(),
            log,
            stats: SessionStats::default(),
            outputs: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Begin a session; returns the id in use (pending until acknowledged)
    pub fn start_session(
        &mut self,
        label: &str,
        metadata: &str,
        ctx: &SessionContext,
    ) -> Result<String> {
        if self.phase == SessionPhase::Starting {
            return Err(SessionError::OperationInProgress.into());
        }
        if self.record.is_some() {
            self.end_session(REASON_NEW_SESSION, ctx)?;
        }

        if !ctx.link_connected {
            if self.config.require_peer_confirmation {
                warn!("Cannot start '{}': companion not connected", label);
                return Err(SessionError::PeerNotConnected.into());
            }
            return Ok(self.start_local(label, metadata, ctx, "companion not connected"));
        }

        let session_id = self.ids.generate(ctx.now);
        info!("Starting session {} for '{}'", session_id, label);
        self.pending_acks.insert(session_id.clone(), ctx.now);
        self.phase = SessionPhase::Starting;
        self.handshake = Some(Handshake {
            session_id: session_id.clone(),
            label: label.to_string(),
            metadata: metadata.to_string(),
            attempt: 1,
            deadline: ctx.now + self.config.sync_timeout,
            resend_at: None,
        });
        self.send_start(ctx)?;
        Ok(session_id)
    }

    /// Stop the active session
    pub fn end_session(&mut self, reason: &str, ctx: &SessionContext) -> Result<()> {
        if self.phase == SessionPhase::Starting {
            return Err(SessionError::OperationInProgress.into());
        }
        let Some(record) = self.record.take() else {
            if self.phase == SessionPhase::Failed {
                self.phase = SessionPhase::Idle;
                return Ok(());
            }
            return Err(SessionError::NoActiveSession.into());
        };

        if ctx.link_connected {
            let stop = SyncStopCommand::new(&record.session_id, ctx.headset_time, reason);
            match StructuredMessage::with_json_payload(
                MessageType::SyncStop,
                &record.session_id,
                &stop,
                ctx.now,
            ) {
                Ok(message) => self.outputs.push(SessionOutput::Send(message)),
                Err(e) => warn!("Could not encode SYNC_STOP: {}", e),
            }
        }

        self.recorder.end_session();
        self.recorder.set_active_label(None);
        self.phase = SessionPhase::Idle;
        self.log.record(
            SyncEventKind::SessionEnd,
            &record.session_id,
            ctx.now,
            None,
            true,
            reason,
        );
        info!("Session {} ended ({})", record.session_id, reason);
        self.emit(SyncEvent::SessionEnded {
            session_id: record.session_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Change the recorder's label and tell the companion
    pub fn set_active_label(&mut self, label: Option<&str>, ctx: &SessionContext) {
        self.recorder.set_active_label(label);
        let Some(record) = self.record.as_mut() else {
            return;
        };
        if let Some(label) = label {
            record.label = label.to_string();
        }
        let session_id = record.session_id.clone();
        self.log.record(
            SyncEventKind::LabelChange,
            &session_id,
            ctx.now,
            None,
            true,
            label.unwrap_or_default(),
        );

        if !(ctx.link_connected && record.is_peer_synced) {
            return;
        }
        let change = VideoChangeCommand {
            session_id: session_id.clone(),
            video_name: label.unwrap_or_default().to_string(),
            headset_time: ctx.headset_time,
        };
        match StructuredMessage::with_json_payload(
            MessageType::VideoChange,
            &session_id,
            &change,
            ctx.now,
        ) {
            Ok(message) => self.outputs.push(SessionOutput::Send(message)),
            Err(e) => warn!("Could not encode VIDEO_CHANGE: {}", e),
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub fn on_sync_ack(&mut self, message: &StructuredMessage, ctx: &SessionContext) {
        let ack: SyncAcknowledgment = match message.decode_payload() {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Ignoring malformed SYNC_ACK: {}", e);
                return;
            }
        };
        let session_id = if ack.session_id.is_empty() {
            message.session_id().to_string()
        } else {
            ack.session_id.clone()
        };

        let Some(sent_at) = self.pending_acks.get(&session_id).copied() else {
            debug!("Ignoring SYNC_ACK for {} with no pending handshake", session_id);
            return;
        };
        let Some(handshake) = self
            .handshake
            .as_mut()
            .filter(|h| h.session_id == session_id)
        else {
            self.pending_acks.remove(&session_id);
            return;
        };

        if !ack.ready {
            warn!("Companion not ready for {}: '{}'", session_id, ack.status);
            handshake.deadline = ctx.now + self.config.sync_timeout;
            handshake.resend_at = None;
            self.log.record(
                SyncEventKind::PeerNotReady,
                &session_id,
                ctx.now,
                None,
                false,
                &ack.status,
            );
            self.emit(SyncEvent::PeerNotReady {
                session_id,
                status: ack.status,
            });
            return;
        }

        let Some(handshake) = self.handshake.take() else {
            return;
        };
        self.pending_acks.remove(&session_id);
        let latency = ctx.now - sent_at;
        info!(
            "Session {} synchronized after {} attempt(s), {}ms",
            session_id, handshake.attempt, latency
        );

        self.recorder.start_session(&session_id, &handshake.label);
        self.recorder.set_active_label(Some(&handshake.label));
        self.record = Some(SessionRecord {
            session_id: session_id.clone(),
            label: handshake.label.clone(),
            metadata: handshake.metadata,
            start_time: ctx.now,
            is_active: true,
            is_peer_synced: true,
        });
        self.phase = SessionPhase::Synchronized;
        self.stats.successful_syncs += 1;
        self.log.record(
            SyncEventKind::Handshake,
            &session_id,
            ctx.now,
            Some(latency),
            true,
            &ack.status,
        );
        self.emit(SyncEvent::SessionStarted {
            session_id,
            label: handshake.label,
            peer_synced: true,
        });
    }

    /// Companion heartbeat; re-marks the matching session as peer-synced
    pub fn on_peer_heartbeat(&mut self, message: &StructuredMessage, ctx: &SessionContext) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        if record.session_id != message.session_id() || record.is_peer_synced {
            return;
        }
        record.is_peer_synced = true;
        self.phase = SessionPhase::Synchronized;
        let session_id = record.session_id.clone();
        info!("Companion heartbeat restored sync for {}", session_id);
        self.log.record(
            SyncEventKind::PeerHeartbeat,
            &session_id,
            ctx.now,
            None,
            true,
            "",
        );
    }

    pub fn on_sync_error(&mut self, message: &StructuredMessage, ctx: &SessionContext) {
        warn!(
            "Companion reported sync error for '{}': {}",
            message.session_id(),
            message.payload()
        );
        self.log.record(
            SyncEventKind::PeerError,
            message.session_id(),
            ctx.now,
            None,
            false,
            message.payload(),
        );
        self.emit(SyncEvent::Error(
            SessionError::PeerNotReady {
                status: message.payload().to_string(),
            }
            .into(),
        ));
    }

    pub fn on_link_lost(&mut self, ctx: &SessionContext) {
        if let Some(handshake) = self.handshake.take() {
            warn!("Link lost during handshake for {}", handshake.session_id);
            self.pending_acks.remove(&handshake.session_id);
            self.phase = SessionPhase::Idle;
            self.fail_handshake(handshake, ctx);
            return;
        }

        let Some(record) = self.record.as_mut() else {
            return;
        };
        if !record.is_peer_synced {
            return;
        }
        let session_id = record.session_id.clone();
        self.log.record(
            SyncEventKind::LinkLost,
            &session_id,
            ctx.now,
            None,
            false,
            "",
        );

        if self.config.require_peer_confirmation {
            // The link is already gone; SYNC_STOP would go nowhere.
            let ctx = SessionContext {
                link_connected: false,
                ..*ctx
            };
            if let Err(e) = self.end_session(REASON_LINK_LOST, &ctx) {
                warn!("Ending {} after link loss failed: {}", session_id, e);
            }
            return;
        }

        if let Some(record) = self.record.as_mut() {
            record.is_peer_synced = false;
        }
        self.phase = SessionPhase::LocalOnly;
        warn!("Session {} continues locally", session_id);
        self.emit(SyncEvent::SessionDegraded { session_id });
    }

    pub fn on_reconnect_exhausted(&mut self, ctx: &SessionContext) {
        if self.config.require_peer_confirmation && self.record.is_some() {
            let ctx = SessionContext {
                link_connected: false,
                ..*ctx
            };
            if let Err(e) = self.end_session(REASON_RECONNECT_EXHAUSTED, &ctx) {
                warn!("Ending session after reconnect exhaustion failed: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Drive handshake timeouts and resends
    pub fn poll(&mut self, ctx: &SessionContext) {
        let Some(handshake) = self.handshake.as_mut() else {
            return;
        };

        if let Some(resend_at) = handshake.resend_at {
            if ctx.now >= resend_at {
                handshake.attempt += 1;
                handshake.resend_at = None;
                handshake.deadline = ctx.now + self.config.sync_timeout;
                let (session_id, attempt) = (handshake.session_id.clone(), handshake.attempt);
                info!("Retrying SYNC_START for {} (attempt {})", session_id, attempt);
                self.log.record(
                    SyncEventKind::HandshakeRetry,
                    &session_id,
                    ctx.now,
                    None,
                    false,
                    &format!("attempt {attempt}"),
                );
                if let Err(e) = self.send_start(ctx) {
                    warn!("Could not resend SYNC_START: {}", e);
                }
            }
            return;
        }

        if ctx.now < handshake.deadline {
            return;
        }
        if handshake.attempt < self.config.retry_attempts {
            debug!(
                "SYNC_ACK for {} timed out on attempt {}",
                handshake.session_id, handshake.attempt
            );
            handshake.resend_at = Some(ctx.now + self.config.retry_delay);
            return;
        }

        if let Some(handshake) = self.handshake.take() {
            self.pending_acks.remove(&handshake.session_id);
            self.fail_handshake(handshake, ctx);
        }
    }

    pub fn take_outputs(&mut self) -> Vec<SessionOutput> {
        std::mem::take(&mut self.outputs)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    /// Id of the active or pending session
    pub fn session_id(&self) -> Option<&str> {
        self.record
            .as_ref()
            .map(|r| r.session_id.as_str())
            .or_else(|| self.handshake.as_ref().map(|h| h.session_id.as_str()))
    }

    pub fn is_peer_synced(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.is_peer_synced)
    }

    pub fn has_pending_ack(&self, session_id: &str) -> bool {
        self.pending_acks.contains_key(session_id)
    }

    pub fn handshake_attempt(&self) -> Option<u32> {
        self.handshake.as_ref().map(|h| h.attempt)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn log(&self) -> &SyncEventLog {
        &self.log
    }

    pub fn status_text(&self, link_connected: bool) -> &'static str {
        if !link_connected {
            return "Disconnected";
        }
        match self.phase {
            SessionPhase::Synchronized => "Synchronized",
            SessionPhase::LocalOnly => "Local Only",
            _ => "Idle",
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn send_start(&mut self, ctx: &SessionContext) -> Result<()> {
        let Some(handshake) = self.handshake.as_ref() else {
            return Ok(());
        };
        let command = SyncStartCommand::new(
            &handshake.session_id,
            ctx.headset_time,
            &handshake.label,
            &handshake.metadata,
        );
        let message = StructuredMessage::with_json_payload(
            MessageType::SyncStart,
            &handshake.session_id,
            &command,
            ctx.now,
        )
        .map_err(SyncError::from)?;
        self.outputs.push(SessionOutput::Send(message));
        Ok(())
    }

    fn start_local(
        &mut self,
        label: &str,
        metadata: &str,
        ctx: &SessionContext,
        details: &str,
    ) -> String {
        let session_id = self.ids.generate_local(ctx.now);
        info!("Starting local session {} for '{}'", session_id, label);
        self.recorder.start_session(&session_id, label);
        self.recorder.set_active_label(Some(label));
        self.record = Some(SessionRecord {
            session_id: session_id.clone(),
            label: label.to_string(),
            metadata: metadata.to_string(),
            start_time: ctx.now,
            is_active: true,
            is_peer_synced: false,
        });
        self.phase = SessionPhase::LocalOnly;
        self.log.record(
            SyncEventKind::LocalStart,
            &session_id,
            ctx.now,
            None,
            true,
            details,
        );
        self.emit(SyncEvent::SessionStarted {
            session_id: session_id.clone(),
            label: label.to_string(),
            peer_synced: false,
        });
        session_id
    }

    fn fail_handshake(&mut self, handshake: Handshake, ctx: &SessionContext) {
        let Handshake {
            session_id,
            label,
            metadata,
            attempt,
            ..
        } = handshake;
        warn!("Session {} handshake failed after {} attempt(s)", session_id, attempt);
        self.stats.failed_syncs += 1;
        self.log.record(
            SyncEventKind::Handshake,
            &session_id,
            ctx.now,
            None,
            false,
            "timeout",
        );
        self.emit(SyncEvent::SessionFailed {
            session_id: session_id.clone(),
            attempts: attempt,
        });

        if self.config.require_peer_confirmation {
            self.phase = SessionPhase::Failed;
            self.emit(SyncEvent::Error(
                SessionError::HandshakeTimeout {
                    session_id,
                    attempts: attempt,
                }
                .into(),
            ));
        } else {
            self.start_local(&label, &metadata, ctx, "handshake failed");
        }
    }

    fn emit(&mut self, event: SyncEvent) {
        self.outputs.push(SessionOutput::Event(event));
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("phase", &self.phase)
            .field("record", &self.record)
            .field("pending_acks", &self.pending_acks.len())
            .field("stats", &self.stats)
            .finish()
    }
}
