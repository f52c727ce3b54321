//! WristSync Runtime
//!
//! Wires a [`LinkTask`] to a [`SyncEngine`] and runs both on tokio:
//!
//! ```text
//! app ──Command──▶ engine loop ──RadioEffect──▶ link task
//!                     ▲                            │
//!                     └──── bounded RadioEvent ◀───┘
//! engine loop ──SyncEvent (broadcast)──▶ observers
//! engine loop ──SyncStatus (watch)─────▶ status readers
//! ```
//!
//! The engine loop wakes on commands and on a drain tick. Each tick empties the
//! inbound radio queue, advances every timer, then forwards effects in order.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use wristsync_core::channel::{
    create_command_channel, create_effect_channel, create_radio_event_channel,
    create_sync_event_channel, CommandReceiver, CommandSender, EffectSender, RadioEventReceiver,
    SyncEventReceiver, SyncEventSender,
};
use wristsync_core::{
    Command, LinkTask, Result, StructuredMessage, SyncConfig, SyncError, TimeSource,
};

use crate::clock::TokioTimeSource;
use crate::engine::{SyncEngine, SyncStatus};
use crate::recorder::{LoggingRecorder, Recorder};

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Cloneable front door to a running runtime
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: CommandSender,
    status: watch::Receiver<SyncStatus>,
    events: SyncEventSender,
}

impl SyncHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::Channel {
                reason: "sync engine is not running".to_string(),
            })
    }

    pub async fn start_scan(&self) -> Result<()> {
        self.send(Command::StartScan).await
    }

    pub async fn connect(&self, address: Option<String>) -> Result<()> {
        self.send(Command::Connect { address }).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect).await
    }

    pub async fn start_session(&self, label: &str, metadata: &str) -> Result<()> {
        self.send(Command::StartSession {
            label: label.to_string(),
            metadata: metadata.to_string(),
        })
        .await
    }

    pub async fn end_session(&self, reason: &str) -> Result<()> {
        self.send(Command::EndSession {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn set_active_label(&self, label: Option<&str>) -> Result<()> {
        self.send(Command::SetActiveLabel {
            label: label.map(str::to_string),
        })
        .await
    }

    pub async fn request_time_sync(&self) -> Result<()> {
        self.send(Command::RequestTimeSync).await
    }

    pub async fn send_message(&self, message: StructuredMessage) -> Result<()> {
        self.send(Command::Send(message)).await
    }

    /// Latest status published by the engine loop
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> SyncEventReceiver {
        self.events.subscribe()
    }
}

// ----------------------------------------------------------------------------
// Runtime
// ----------------------------------------------------------------------------

pub struct SyncRuntime {
    config: SyncConfig,
    link: Option<Box<dyn LinkTask>>,
    recorder: Option<Box<dyn Recorder>>,
    companion_address: Option<String>,
    events: SyncEventSender,
    handle: Option<SyncHandle>,
    link_handle: Option<JoinHandle<Result<()>>>,
    engine_handle: Option<JoinHandle<Result<()>>>,
}

impl SyncRuntime {
    pub fn new(config: SyncConfig) -> Self {
        let events = create_sync_event_channel(&config.channels);
        Self {
            config,
            link: None,
            recorder: None,
            companion_address: None,
            events,
            handle: None,
            link_handle: None,
            engine_handle: None,
        }
    }

    pub fn with_link<L: LinkTask + 'static>(mut self, link: L) -> Self {
        self.link = Some(Box::new(link));
        self
    }

    pub fn with_recorder<R: Recorder + 'static>(mut self, recorder: R) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }

    pub fn with_companion_address(mut self, address: Option<String>) -> Self {
        self.companion_address = address;
        self
    }

    /// Observe events; subscribe before `start` to see everything
    pub fn subscribe(&self) -> SyncEventReceiver {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<SyncHandle> {
        self.handle.clone()
    }

    /// Start on the monotonic tokio clock, anchored at the current wall time
    pub async fn start(&mut self) -> Result<SyncHandle> {
        self.start_with_time_source(TokioTimeSource::new()).await
    }

    pub async fn start_with_time_source<T: TimeSource + 'static>(
        &mut self,
        time_source: T,
    ) -> Result<SyncHandle> {
        if self.handle.is_some() {
            return Err(SyncError::Configuration {
                reason: "runtime already running".to_string(),
            });
        }
        self.config.validate()?;
        let mut link = self.link.take().ok_or_else(|| SyncError::Configuration {
            reason: "no link task registered".to_string(),
        })?;
        let recorder: Box<dyn Recorder> = match self.recorder.take() {
            Some(recorder) => recorder,
            None => Box::new(LoggingRecorder::default()),
        };

        let (command_tx, command_rx) = create_command_channel(&self.config.channels);
        let (radio_tx, radio_rx) = create_radio_event_channel(&self.config.channels);
        let (effect_tx, effect_rx) = create_effect_channel(&self.config.channels);

        let mut engine = SyncEngine::new(&self.config, time_source, recorder, self.events.clone());
        engine.set_companion_address(self.companion_address.clone());
        let (status_tx, status_rx) = watch::channel(engine.status());

        link.attach_channels(radio_tx, effect_rx)?;
        let link_name = link.name();
        self.link_handle = Some(tokio::spawn(async move {
            let result = link.run().await;
            if let Err(e) = &result {
                error!("{} link task failed: {}", link_name, e);
            }
            result
        }));

        let drain_interval = self.config.channels.drain_interval;
        self.engine_handle = Some(tokio::spawn(run_engine(
            engine,
            command_rx,
            radio_rx,
            effect_tx,
            status_tx,
            drain_interval,
        )));

        let handle = SyncHandle {
            commands: command_tx,
            status: status_rx,
            events: self.events.clone(),
        };
        self.handle = Some(handle.clone());
        info!("Sync runtime started with {} link", link_name);
        Ok(handle)
    }

    /// Ask the engine to shut down, then stop the link task
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if let Err(e) = handle.send(Command::Shutdown).await {
            debug!("Engine already stopped: {}", e);
        }
        if let Some(engine) = self.engine_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), engine).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => warn!("Engine task panicked: {}", e),
                Err(_) => warn!("Engine did not stop in time"),
            }
        }
        if let Some(link) = self.link_handle.take() {
            link.abort();
        }
        info!("Sync runtime stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Engine Loop
// ----------------------------------------------------------------------------

async fn run_engine<T: TimeSource>(
    mut engine: SyncEngine<T>,
    mut commands: CommandReceiver,
    mut radio_events: RadioEventReceiver,
    effects: EffectSender,
    status: watch::Sender<SyncStatus>,
    drain_interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut radio_closed = false;
    info!("Sync engine starting");

    while engine.is_running() {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    if let Err(e) = engine.handle_command(command) {
                        if e.is_fatal() {
                            error!("Unrecoverable error, stopping sync engine: {}", e);
                            return Err(e);
                        }
                        warn!("Command failed: {}", e);
                        engine.report_error(e);
                    }
                }
                None => {
                    info!("Command channel closed, shutting down");
                    break;
                }
            },
            _ = ticker.tick() => {
                while !radio_closed {
                    match radio_events.try_recv() {
                        Ok(event) => engine.handle_radio_event(event),
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            warn!("Link task closed its event queue");
                            radio_closed = true;
                        }
                    }
                }
                engine.poll();
            }
        }

        for effect in engine.take_effects() {
            if effects.send(effect).await.is_err() {
                if !radio_closed {
                    warn!("Link task is gone, dropping radio effects");
                }
                radio_closed = true;
                break;
            }
        }
        status.send_replace(engine.status());
    }

    info!("Sync engine stopped");
    Ok(())
}
