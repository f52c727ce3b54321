//! Command handlers for the WristSync CLI

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use wristsync_ble::CompanionServer;
use wristsync_core::channel::SyncEventReceiver;
use wristsync_core::{LinkState, SessionError, SyncError, SyncEvent};
use wristsync_runtime::{Preferences, SyncHandle};

use crate::app::WristSyncApp;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::demo::{spawn_companion_sensors, spawn_simulated_rows};
use crate::error::{CliError, Result};
use crate::recording::SessionCsvWriter;

/// Reason sent with SYNC_STOP when the user ends a recording
pub const REASON_USER_STOP: &str = "USER_STOP";

/// Grace period on top of engine timeouts before the CLI gives up waiting
const WAIT_SLACK: Duration = Duration::from_secs(1);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        let data_dir = config.resolve_data_dir(cli.data_dir.as_deref())?;
        match cli.command {
            Commands::Scan => Self::handle_scan(config, &data_dir, cli.simulate).await,
            Commands::Connect { address } => {
                Self::handle_connect(config, &data_dir, cli.simulate, address).await
            }
            Commands::Record {
                label,
                metadata,
                duration,
                address,
            } => {
                Self::handle_record(
                    config,
                    &data_dir,
                    cli.simulate,
                    RecordOptions {
                        label,
                        metadata,
                        duration: duration.map(Duration::from_secs),
                        address,
                    },
                )
                .await
            }
            Commands::SetAddress { address } => Self::handle_set_address(&data_dir, &address),
            Commands::Status => Self::handle_status(&config, &data_dir),
            Commands::Companion { name, demo_sensors } => {
                Self::handle_companion(config, name, demo_sensors).await
            }
        }
    }

    /// Scan once and list what answered
    async fn handle_scan(config: AppConfig, data_dir: &Path, simulate: bool) -> Result<()> {
        let scan_window = config.sync.link.scan_timeout + WAIT_SLACK;
        let mut app = WristSyncApp::new(config, data_dir.to_path_buf(), simulate).await?;
        let mut events = app.subscribe();
        let handle = app.start().await?;
        handle.start_scan().await?;

        let mut found = Vec::new();
        wait_for(&mut events, scan_window, |event| match event {
            SyncEvent::DeviceFound { address, name } => {
                println!("{}  {}", address, name.as_deref().unwrap_or("(unnamed)"));
                found.push(address.clone());
                None
            }
            SyncEvent::LinkStateChanged {
                from: LinkState::Scanning,
                ..
            } => Some(()),
            _ => None,
        })
        .await;

        match found.as_slice() {
            [] => println!("No companions found"),
            [only] if app.preferences().companion_address.is_none() => {
                println!("Remember it with: wristsync set-address {only}");
            }
            _ => {}
        }
        app.stop().await
    }

    /// Connect and stay attached until Ctrl-C
    async fn handle_connect(
        config: AppConfig,
        data_dir: &Path,
        simulate: bool,
        address: Option<String>,
    ) -> Result<()> {
        let mut app = WristSyncApp::new(config, data_dir.to_path_buf(), simulate).await?;
        let mut events = app.subscribe();
        let handle = app.start().await?;

        let connected = connect_and_wait(&app, &handle, &mut events, address).await?;
        app.remember_companion(&connected)?;
        println!("Connected to {connected}");
        println!("{}", serde_json::to_string_pretty(&handle.status())?);

        follow_events(&mut events, ctrl_c()).await;
        handle.disconnect().await?;
        app.stop().await
    }

    /// Connect, run one session and write its rows to disk
    async fn handle_record(
        config: AppConfig,
        data_dir: &Path,
        simulate: bool,
        options: RecordOptions,
    ) -> Result<()> {
        let require_peer = config.sync.session.require_peer_confirmation;
        let notifier = config.sync.notifier.clone();
        let mut app = WristSyncApp::new(config, data_dir.to_path_buf(), simulate).await?;
        let mut events = app.subscribe();
        let handle = app.start().await?;
        let demo = app
            .simulated()
            .map(|link| spawn_simulated_rows(link.clone(), notifier));

        match connect_and_wait(&app, &handle, &mut events, options.address.clone()).await {
            Ok(address) => {
                app.remember_companion(&address)?;
                println!("Connected to {address}");
            }
            Err(e) if require_peer => return Err(e),
            Err(e) => warn!("Recording without companion: {}", e),
        }

        handle.start_session(&options.label, &options.metadata).await?;
        let outcome = record_until_stopped(&mut events, app.data_dir(), options.duration).await;

        if matches!(outcome, Ok(RecordOutcome::Stopped(_))) {
            handle.end_session(REASON_USER_STOP).await?;
            let ended = wait_for(&mut events, Duration::from_secs(2), |event| match event {
                SyncEvent::SessionEnded { session_id, .. } => Some(session_id.clone()),
                _ => None,
            })
            .await;
            if ended.is_none() {
                warn!("Session end was not confirmed");
            }
        }
        if let Some(demo) = demo {
            demo.abort();
        }

        let status = handle.status();
        app.stop().await?;

        let writer = match outcome? {
            RecordOutcome::Stopped(writer) | RecordOutcome::Ended(writer) => writer,
        };
        if let Some(writer) = writer {
            let (path, rows) = writer.finish()?;
            println!("Saved {} rows to {}", rows, path.display());
        }
        println!(
            "Handshakes: {} succeeded, {} failed",
            status.successful_syncs, status.failed_syncs
        );
        Ok(())
    }

    fn handle_set_address(data_dir: &Path, address: &str) -> Result<()> {
        let mut preferences = Preferences::load(data_dir)?;
        preferences.set_companion_address(address);
        preferences.save(data_dir)?;
        println!(
            "Companion set to {}",
            preferences.companion_address.as_deref().unwrap_or(address)
        );
        Ok(())
    }

    fn handle_status(config: &AppConfig, data_dir: &Path) -> Result<()> {
        let preferences = Preferences::load(data_dir)?;
        println!("Data directory: {}", data_dir.display());
        println!(
            "Companion: {}",
            preferences.companion_address.as_deref().unwrap_or("(none)")
        );
        println!(
            "Peer confirmation: {}",
            if config.sync.session.require_peer_confirmation {
                "required"
            } else {
                "optional"
            }
        );
        println!("{}", serde_json::to_string_pretty(&config.sync)?);
        Ok(())
    }

    async fn handle_companion(
        config: AppConfig,
        name: Option<String>,
        demo_sensors: bool,
    ) -> Result<()> {
        let mut server_config = config.companion_config();
        if let Some(name) = name {
            server_config = server_config.with_local_name(name);
        }
        let server = CompanionServer::new(server_config);
        let demo = demo_sensors.then(|| spawn_companion_sensors(server.sensor_feed()));

        info!("Starting companion, Ctrl-C to stop");
        let result = server.run(ctrl_c()).await;
        if let Some(demo) = demo {
            demo.abort();
        }
        Ok(result?)
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

struct RecordOptions {
    label: String,
    metadata: String,
    duration: Option<Duration>,
    address: Option<String>,
}

enum RecordOutcome {
    /// Duration elapsed or the user interrupted; the session is still open
    Stopped(Option<SessionCsvWriter>),
    /// The engine ended the session on its own
    Ended(Option<SessionCsvWriter>),
}

async fn record_until_stopped(
    events: &mut SyncEventReceiver,
    data_dir: &Path,
    duration: Option<Duration>,
) -> Result<RecordOutcome> {
    let stop = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => ctrl_c().await,
        }
    };
    tokio::pin!(stop);
    let mut writer: Option<SessionCsvWriter> = None;

    loop {
        tokio::select! {
            _ = &mut stop => return Ok(RecordOutcome::Stopped(writer)),
            event = events.recv() => match event {
                Ok(SyncEvent::SessionStarted { session_id, label, peer_synced }) => {
                    println!(
                        "Session {} started for '{}' ({})",
                        session_id,
                        label,
                        if peer_synced { "synchronized" } else { "local only" }
                    );
                    writer = Some(SessionCsvWriter::create(data_dir, &session_id)?);
                }
                Ok(SyncEvent::Sensor(reading)) => {
                    if let Some(writer) = writer.as_mut() {
                        writer.append(&reading)?;
                    }
                }
                Ok(SyncEvent::SessionEnded { session_id, reason }) => {
                    println!("Session {session_id} ended: {reason}");
                    return Ok(RecordOutcome::Ended(writer));
                }
                Ok(SyncEvent::Error(SyncError::Session(
                    e @ (SessionError::PeerNotConnected | SessionError::HandshakeTimeout { .. }),
                ))) if writer.is_none() => {
                    return Err(SyncError::Session(e).into());
                }
                Ok(other) => {
                    if let Some(line) = describe(&other) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} sync events", missed),
                Err(RecvError::Closed) => return Ok(RecordOutcome::Ended(writer)),
            }
        }
    }
}

async fn connect_and_wait(
    app: &WristSyncApp,
    handle: &SyncHandle,
    events: &mut SyncEventReceiver,
    address: Option<String>,
) -> Result<String> {
    let window = app.config().sync.link.connect_timeout + WAIT_SLACK;
    handle.connect(address).await?;
    let outcome = wait_for(events, window, |event| match event {
        SyncEvent::Connected { address } => Some(Ok(address.clone())),
        SyncEvent::Error(SyncError::Transport(e)) => Some(Err(e.clone())),
        _ => None,
    })
    .await;
    match outcome {
        Some(Ok(address)) => Ok(address),
        Some(Err(e)) => Err(SyncError::from(e).into()),
        None => Err(CliError::Timeout("companion connection".to_string())),
    }
}

/// Print events until `until` resolves
async fn follow_events<F: Future<Output = ()>>(events: &mut SyncEventReceiver, until: F) {
    tokio::pin!(until);
    loop {
        tokio::select! {
            _ = &mut until => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} sync events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Feed events to `matcher` until it yields or `window` passes
async fn wait_for<T>(
    events: &mut SyncEventReceiver,
    window: Duration,
    mut matcher: impl FnMut(&SyncEvent) -> Option<T>,
) -> Option<T> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => return None,
            Ok(Ok(event)) => {
                if let Some(found) = matcher(&event) {
                    return Some(found);
                }
            }
            Ok(Err(RecvError::Lagged(missed))) => warn!("Missed {} sync events", missed),
            Ok(Err(RecvError::Closed)) => return None,
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// One-line rendering of the events worth showing on a terminal
pub fn describe(event: &SyncEvent) -> Option<String> {
    let line = match event {
        SyncEvent::LinkStateChanged { from, to } => format!("link: {from} -> {to}"),
        SyncEvent::DeviceFound { address, name } => {
            format!("found {} ({})", address, name.as_deref().unwrap_or("unnamed"))
        }
        SyncEvent::Connected { address } => format!("connected to {address}"),
        SyncEvent::Disconnected { address, reason } => {
            format!("disconnected from {address}: {reason}")
        }
        SyncEvent::ClockOffset {
            offset_secs,
            round_trip_ms,
            within_threshold,
        } => format!(
            "clock offset {:+.3}s (rtt {}ms){}",
            offset_secs,
            round_trip_ms,
            if *within_threshold { "" } else { ", over threshold" }
        ),
        SyncEvent::LinkLost { silent_ms } => format!("link lost after {silent_ms}ms of silence"),
        SyncEvent::ReconnectScheduled { attempt, delay_ms } => {
            format!("reconnect attempt {attempt} in {delay_ms}ms")
        }
        SyncEvent::ReconnectExhausted { attempts } => {
            format!("gave up reconnecting after {attempts} attempts")
        }
        SyncEvent::SessionStarted {
            session_id,
            peer_synced,
            ..
        } => format!(
            "session {} started ({})",
            session_id,
            if *peer_synced { "synchronized" } else { "local only" }
        ),
        SyncEvent::SessionEnded { session_id, reason } => {
            format!("session {session_id} ended: {reason}")
        }
        SyncEvent::SessionFailed {
            session_id,
            attempts,
        } => format!("handshake for {session_id} failed after {attempts} attempts"),
        SyncEvent::SessionDegraded { session_id } => {
            format!("session {session_id} continues without companion")
        }
        SyncEvent::PeerNotReady { session_id, status } => {
            format!("companion not ready for {session_id}: {status}")
        }
        SyncEvent::Sensor(reading) => format!("row {}", reading.to_csv_row().trim_end()),
        SyncEvent::RawMessage(line) => format!("raw: {line}"),
        SyncEvent::DataMessage(message) | SyncEvent::Message(message) => {
            format!("{}: {}", message.kind(), message.payload())
        }
        SyncEvent::Error(error) => format!("error: {error}"),
        SyncEvent::Latency { .. } => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wristsync_core::TransportError;

    #[test]
    fn describes_link_transitions() {
        let line = describe(&SyncEvent::LinkStateChanged {
            from: LinkState::Connecting,
            to: LinkState::Connected,
        });
        assert_eq!(line.as_deref(), Some("link: Connecting -> Connected"));
    }

    #[test]
    fn latency_samples_stay_quiet() {
        assert!(describe(&SyncEvent::Latency {
            latency_ms: 40,
            average_ms: 42.5
        })
        .is_none());
    }

    #[test]
    fn offsets_show_sign_and_threshold() {
        let line = describe(&SyncEvent::ClockOffset {
            offset_secs: -0.25,
            round_trip_ms: 80,
            within_threshold: false,
        })
        .unwrap();
        assert_eq!(line, "clock offset -0.250s (rtt 80ms), over threshold");
    }

    #[test]
    fn errors_are_prefixed() {
        let line = describe(&SyncEvent::Error(TransportError::NotConnected.into())).unwrap();
        assert!(line.starts_with("error: "));
    }

    #[test]
    fn set_address_persists_normalized() {
        let dir = tempfile::tempdir().unwrap();
        CommandDispatcher::handle_set_address(dir.path(), "aa:bb:cc:dd:ee:ff").unwrap();
        let stored = Preferences::load(dir.path()).unwrap();
        assert_eq!(stored.companion_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[tokio::test]
    async fn wait_for_gives_up_after_window() {
        let events = wristsync_core::channel::create_sync_event_channel(&Default::default());
        let mut rx = events.subscribe();
        let result: Option<()> = wait_for(&mut rx, Duration::from_millis(20), |_| Some(())).await;
        assert!(result.is_none());
    }
}
