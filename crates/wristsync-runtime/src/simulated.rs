//! In-process companion for tests and `--simulate`
//!
//! `SimulatedLink` plays both the radio and the wrist device. Effects from the
//! engine are answered the way a real companion would: scans report the
//! configured devices, writes are reassembled into envelopes and handed to a
//! [`CompanionResponder`], and replies come back as notification chunks.
//! A [`SimulatedLinkHandle`] lets tests misbehave on purpose: drop the link,
//! go silent, refuse readiness or push sensor rows.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};
use wristsync_core::channel::{EffectReceiver, RadioEventSender};
use wristsync_core::peripheral::CompanionResponder;
use wristsync_core::protocol::csv::header_row;
use wristsync_core::protocol::{chunk_payload, LineAssembler, MAX_NOTIFY_BYTES};
use wristsync_core::{
    LinkTask, RadioEffect, RadioEvent, Result, StructuredMessage, SyncError, TimeSource,
    TransportError,
};

/// How the fake radio answers a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Accept,
    /// Report the connect as refused
    Refuse,
    /// Never answer; the engine's connect timeout fires
    Hang,
    /// Connect, then fail service discovery
    FailDiscovery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCompanion {
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
}

impl SimulatedCompanion {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
            rssi: -60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedLinkConfig {
    pub companions: Vec<SimulatedCompanion>,
    pub connect: ConnectBehavior,
    pub connect_delay: Duration,
    pub ready: bool,
    /// Companion swallows every write without replying
    pub silent: bool,
    /// Companion clock minus headset clock
    pub clock_skew_ms: i64,
    pub max_payload: usize,
}

impl Default for SimulatedLinkConfig {
    fn default() -> Self {
        Self {
            companions: vec![SimulatedCompanion::new("C0:FF:EE:00:00:01", "WristSync Watch")],
            connect: ConnectBehavior::Accept,
            connect_delay: Duration::from_millis(50),
            ready: true,
            silent: false,
            clock_skew_ms: 0,
            max_payload: MAX_NOTIFY_BYTES,
        }
    }
}

impl SimulatedLinkConfig {
    pub fn with_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect = behavior;
        self
    }

    pub fn with_clock_skew(mut self, skew_ms: i64) -> Self {
        self.clock_skew_ms = skew_ms;
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

#[derive(Debug, Clone)]
enum Control {
    DropLink { reason: String },
    Notify(Vec<u8>),
    SendHeartbeat,
    SetReady(bool),
    SetSilent(bool),
    SetConnect(ConnectBehavior),
}

/// Test-side control over a running [`SimulatedLink`]
#[derive(Debug, Clone)]
pub struct SimulatedLinkHandle {
    control: mpsc::UnboundedSender<Control>,
    received: Arc<Mutex<Vec<StructuredMessage>>>,
}

impl SimulatedLinkHandle {
    /// Companion-side disconnect
    pub fn drop_link(&self, reason: &str) {
        self.send(Control::DropLink {
            reason: reason.to_string(),
        });
    }

    /// Notify raw bytes to the headset
    pub fn notify(&self, bytes: impl Into<Vec<u8>>) {
        self.send(Control::Notify(bytes.into()));
    }

    /// Notify one line, appending the terminator
    pub fn notify_line(&self, line: &str) {
        self.notify(format!("{line}\n"));
    }

    /// Send a HEARTBEAT for the joined session
    pub fn send_heartbeat(&self) {
        self.send(Control::SendHeartbeat);
    }

    pub fn set_ready(&self, ready: bool) {
        self.send(Control::SetReady(ready));
    }

    pub fn set_silent(&self, silent: bool) {
        self.send(Control::SetSilent(silent));
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.send(Control::SetConnect(behavior));
    }

    /// Every envelope the headset has written so far
    pub fn received(&self) -> Vec<StructuredMessage> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn send(&self, control: Control) {
        if self.control.send(control).is_err() {
            debug!("Simulated link is gone");
        }
    }
}

pub struct SimulatedLink<T: TimeSource> {
    config: SimulatedLinkConfig,
    time_source: T,
    responder: CompanionResponder,
    assembler: LineAssembler,
    connected: bool,
    radio: Option<RadioEventSender>,
    effects: Option<EffectReceiver>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    received: Arc<Mutex<Vec<StructuredMessage>>>,
}

impl<T: TimeSource> SimulatedLink<T> {
    pub fn new(config: SimulatedLinkConfig, time_source: T) -> Self {
        let mut responder = CompanionResponder::new().with_clock_skew(config.clock_skew_ms);
        responder.set_ready(config.ready);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            config,
            time_source,
            responder,
            assembler: LineAssembler::default(),
            connected: false,
            radio: None,
            effects: None,
            control_tx,
            control_rx,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> SimulatedLinkHandle {
        SimulatedLinkHandle {
            control: self.control_tx.clone(),
            received: Arc::clone(&self.received),
        }
    }

    fn radio(&self) -> Result<&RadioEventSender> {
        self.radio.as_ref().ok_or_else(|| SyncError::Channel {
            reason: "simulated link has no event sender".to_string(),
        })
    }

    fn notify(&self, bytes: &[u8]) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        let radio = self.radio()?;
        for chunk in chunk_payload(bytes, self.config.max_payload) {
            radio.send(RadioEvent::Data(chunk.to_vec()))?;
        }
        Ok(())
    }

    async fn apply(&mut self, effect: RadioEffect) -> Result<()> {
        match effect {
            RadioEffect::StartScan => {
                for companion in &self.config.companions {
                    self.radio()?.send(RadioEvent::DeviceFound {
                        address: companion.address.clone(),
                        name: companion.name.clone(),
                        rssi: Some(companion.rssi),
                    })?;
                }
            }
            RadioEffect::StopScan => {}
            RadioEffect::Connect { address, attempt } => {
                self.connected = false;
                self.assembler.reset();
                match self.config.connect {
                    ConnectBehavior::Hang => debug!("Simulated connect to {} hangs", address),
                    ConnectBehavior::Refuse => {
                        self.radio()?.send(RadioEvent::ConnectFailed {
                            attempt,
                            error: TransportError::ConnectFailed {
                                address,
                                reason: "refused".to_string(),
                            },
                        })?;
                    }
                    ConnectBehavior::Accept | ConnectBehavior::FailDiscovery => {
                        tokio::time::sleep(self.config.connect_delay).await;
                        self.radio()?.send(RadioEvent::Connected { attempt })?;
                    }
                }
            }
            RadioEffect::Discover { attempt } => {
                if self.config.connect == ConnectBehavior::FailDiscovery {
                    self.radio()?.send(RadioEvent::ConnectFailed {
                        attempt,
                        error: TransportError::DiscoveryFailed {
                            reason: "sync service not found".to_string(),
                        },
                    })?;
                    return Ok(());
                }
                self.connected = true;
                self.radio()?.send(RadioEvent::Subscribed { attempt })?;
                info!("Simulated companion subscribed");
                self.notify(header_row().as_bytes())?;
            }
            RadioEffect::Write { data } => self.on_write(&data)?,
            RadioEffect::Disconnect => {
                if self.connected {
                    self.connected = false;
                    self.radio()?.send(RadioEvent::Disconnected {
                        reason: "local disconnect".to_string(),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn on_write(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return self.radio()?.send(RadioEvent::WriteFailed {
                reason: "not connected".to_string(),
            });
        }
        for line in self.assembler.push(data) {
            let Ok(message) = StructuredMessage::decode(&line) else {
                debug!("Simulated companion ignoring {:?}", line);
                continue;
            };
            if let Ok(mut received) = self.received.lock() {
                received.push(message.clone());
            }
            if self.config.silent {
                continue;
            }
            let now = self.time_source.now();
            if let Some(reply) = self.responder.respond(&message, now) {
                self.notify(&reply.encode_frame())?;
            }
        }
        Ok(())
    }

    fn on_control(&mut self, control: Control) -> Result<()> {
        match control {
            Control::DropLink { reason } => {
                if self.connected {
                    self.connected = false;
                    self.radio()?.send(RadioEvent::Disconnected { reason })?;
                }
            }
            Control::Notify(bytes) => self.notify(&bytes)?,
            Control::SendHeartbeat => {
                if let Some(heartbeat) = self.responder.heartbeat(self.time_source.now()) {
                    self.notify(&heartbeat.encode_frame())?;
                }
            }
            Control::SetReady(ready) => self.responder.set_ready(ready),
            Control::SetSilent(silent) => self.config.silent = silent,
            Control::SetConnect(behavior) => self.config.connect = behavior,
        }
        Ok(())
    }
}

#[async_trait]
impl<T: TimeSource + 'static> LinkTask for SimulatedLink<T> {
    fn attach_channels(
        &mut self,
        event_sender: RadioEventSender,
        effect_receiver: EffectReceiver,
    ) -> Result<()> {
        self.radio = Some(event_sender);
        self.effects = Some(effect_receiver);
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        let mut effects = self.effects.take().ok_or_else(|| SyncError::Channel {
            reason: "simulated link started without channels".to_string(),
        })?;
        info!("Simulated link running");

        loop {
            tokio::select! {
                effect = effects.recv() => match effect {
                    Some(effect) => self.apply(effect).await?,
                    None => break,
                },
                Some(control) = self.control_rx.recv() => self.on_control(control)?,
            }
        }

        info!("Simulated link stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
