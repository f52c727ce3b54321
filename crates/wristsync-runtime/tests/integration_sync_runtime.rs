//! End-to-end tests for the sync runtime
//!
//! Each test runs the real engine loop against a `SimulatedLink` on a paused
//! tokio clock. Timers fire as soon as every task is idle, so multi-second
//! handshake and reconnect schedules complete instantly and deterministically.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use wristsync_core::{
    MessageType, SessionConfig, SessionError, SyncConfig, SyncError, SyncEvent, Timestamp,
    TransportError,
};
use wristsync_runtime::{
    ConnectBehavior, MemoryRecorder, RecorderCall, SessionPhase, SimulatedLink,
    SimulatedLinkConfig, SimulatedLinkHandle, SyncHandle, SyncRuntime, TokioTimeSource,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct Harness {
    runtime: SyncRuntime,
    handle: SyncHandle,
    companion: SimulatedLinkHandle,
    events: tokio::sync::broadcast::Receiver<SyncEvent>,
    recorder: MemoryRecorder,
}

async fn start(sim: SimulatedLinkConfig, config: SyncConfig) -> Harness {
    let clock = TokioTimeSource::starting_at(Timestamp::new(1_700_000_000_000));
    let link = SimulatedLink::new(sim, clock);
    let companion = link.handle();
    let recorder = MemoryRecorder::new();

    let mut runtime = SyncRuntime::new(config)
        .with_link(link)
        .with_recorder(recorder.clone());
    let events = runtime.subscribe();
    let handle = runtime
        .start_with_time_source(clock)
        .await
        .expect("runtime should start");

    Harness {
        runtime,
        handle,
        companion,
        events,
        recorder,
    }
}

fn config() -> SyncConfig {
    let mut config = SyncConfig::testing();
    config.session.device_seed = Some("0badf00d".to_string());
    config
}

async fn expect_event<F>(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>, within: Duration, matches: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event was not observed")
}

async fn connect(harness: &mut Harness) {
    harness.handle.start_scan().await.unwrap();
    expect_event(&mut harness.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::DeviceFound { .. })
    })
    .await;
    harness.handle.connect(None).await.unwrap();
    expect_event(&mut harness.events, Duration::from_secs(2), |e| {
        matches!(e, SyncEvent::Connected { .. })
    })
    .await;
}

// ----------------------------------------------------------------------------
// Link and Time Sync
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scan_connect_and_estimate_offset() {
    let mut h = start(SimulatedLinkConfig::default().with_clock_skew(250), config()).await;
    connect(&mut h).await;

    let event = expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::ClockOffset { .. })
    })
    .await;
    let SyncEvent::ClockOffset {
        offset_secs,
        within_threshold,
        ..
    } = event
    else {
        unreachable!();
    };
    assert!((offset_secs - 0.25).abs() < 0.05, "offset {offset_secs}");
    assert!(within_threshold);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = h.handle.status();
    assert!(status.link_state.is_connected());
    assert_eq!(status.address.as_deref(), Some("C0:FF:EE:00:00:01"));
    assert_eq!(status.status_text, "Idle");
    h.runtime.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn hung_connect_times_out() {
    let mut h = start(
        SimulatedLinkConfig::default().with_connect(ConnectBehavior::Hang),
        config(),
    )
    .await;
    h.handle.connect(Some("c0:ff:ee:00:00:01".into())).await.unwrap();

    let event = expect_event(&mut h.events, Duration::from_secs(10), |e| {
        matches!(e, SyncEvent::Error(_))
    })
    .await;
    assert!(matches!(
        event,
        SyncEvent::Error(SyncError::Transport(TransportError::ConnectTimeout { duration_ms: 5_000, .. }))
    ));
    assert!(!h.handle.status().link_state.is_connected());
}

#[tokio::test(start_paused = true)]
async fn peer_ping_latency_is_tracked() {
    let mut h = start(SimulatedLinkConfig::default(), config()).await;
    connect(&mut h).await;

    let event = expect_event(&mut h.events, Duration::from_secs(5), |e| {
        matches!(e, SyncEvent::Latency { .. })
    })
    .await;
    assert!(matches!(event, SyncEvent::Latency { latency_ms, .. } if latency_ms < 100));
}

// ----------------------------------------------------------------------------
// Session Handshake
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn handshake_synchronizes_and_starts_recorder() {
    let mut h = start(SimulatedLinkConfig::default(), config()).await;
    connect(&mut h).await;

    h.handle.start_session("intro.mp4", "{}").await.unwrap();
    let event = expect_event(&mut h.events, Duration::from_secs(2), |e| {
        matches!(e, SyncEvent::SessionStarted { .. })
    })
    .await;
    let SyncEvent::SessionStarted {
        session_id,
        peer_synced,
        ..
    } = event
    else {
        unreachable!();
    };
    assert!(peer_synced);
    assert!(session_id.starts_with("VR_"));
    assert!(session_id.contains("_0badf00d_"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = h.handle.status();
    assert_eq!(status.session_phase, SessionPhase::Synchronized);
    assert_eq!(status.status_text, "Synchronized");
    assert!(h.recorder.calls().contains(&RecorderCall::Start {
        session_id: session_id.clone(),
        label: "intro.mp4".into(),
    }));

    h.handle.end_session("USER_STOPPED").await.unwrap();
    expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::SessionEnded { reason, .. } if reason == "USER_STOPPED")
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h
        .companion
        .received()
        .iter()
        .any(|m| m.kind() == &MessageType::SyncStop && m.session_id() == session_id));
}

#[tokio::test(start_paused = true)]
async fn unready_companion_exhausts_retries_then_records_locally() {
    let mut h = start(SimulatedLinkConfig::default().with_ready(false), config()).await;
    connect(&mut h).await;

    h.handle.start_session("clip", "").await.unwrap();
    expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::PeerNotReady { status, .. } if status == "NOT_READY")
    })
    .await;
    let failed = expect_event(&mut h.events, Duration::from_secs(20), |e| {
        matches!(e, SyncEvent::SessionFailed { .. })
    })
    .await;
    assert!(matches!(failed, SyncEvent::SessionFailed { attempts: 3, .. }));

    let local = expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::SessionStarted { .. })
    })
    .await;
    assert!(matches!(
        local,
        SyncEvent::SessionStarted { ref session_id, peer_synced: false, .. } if session_id.ends_with("_LOCAL")
    ));

    let starts = h
        .companion
        .received()
        .iter()
        .filter(|m| m.kind() == &MessageType::SyncStart)
        .count();
    assert_eq!(starts, 3);
}

#[tokio::test(start_paused = true)]
async fn strict_session_requires_connection() {
    let mut cfg = config();
    cfg.session = SessionConfig::strict().with_device_seed("0badf00d");
    let mut h = start(SimulatedLinkConfig::default(), cfg).await;

    h.handle.start_session("clip", "").await.unwrap();
    let event = expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::Error(_))
    })
    .await;
    assert_eq!(
        event,
        SyncEvent::Error(SyncError::Session(SessionError::PeerNotConnected))
    );
}

// ----------------------------------------------------------------------------
// Link Health
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silent_companion_is_declared_lost_and_reconnected() {
    let mut h = start(SimulatedLinkConfig::default(), config()).await;
    connect(&mut h).await;
    h.companion.set_silent(true);

    let lost = expect_event(&mut h.events, Duration::from_secs(10), |e| {
        matches!(e, SyncEvent::LinkLost { .. })
    })
    .await;
    assert!(matches!(lost, SyncEvent::LinkLost { silent_ms } if silent_ms >= 6_000));
    expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::ReconnectScheduled { attempt: 1, delay_ms: 2_000 })
    })
    .await;
    expect_event(&mut h.events, Duration::from_secs(5), |e| {
        matches!(e, SyncEvent::Connected { .. })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn default_start_times_silence_on_the_monotonic_clock() {
    let link = SimulatedLink::new(SimulatedLinkConfig::default(), TokioTimeSource::new());
    let companion = link.handle();
    let mut runtime = SyncRuntime::new(config()).with_link(link);
    let mut events = runtime.subscribe();
    let handle = runtime.start().await.unwrap();

    handle.connect(Some("C0:FF:EE:00:00:01".into())).await.unwrap();
    expect_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, SyncEvent::Connected { .. })
    })
    .await;
    companion.set_silent(true);

    // Only tokio time moves here; a wall-clock engine would never see the silence
    let lost = expect_event(&mut events, Duration::from_secs(10), |e| {
        matches!(e, SyncEvent::LinkLost { .. })
    })
    .await;
    assert!(matches!(lost, SyncEvent::LinkLost { silent_ms } if silent_ms >= 6_000));
    runtime.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_budget() {
    let mut h = start(SimulatedLinkConfig::default(), config()).await;
    connect(&mut h).await;
    h.companion.set_connect_behavior(ConnectBehavior::Refuse);
    h.companion.drop_link("out of range");

    expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::Disconnected { reason, .. } if reason == "out of range")
    })
    .await;
    let exhausted = expect_event(&mut h.events, Duration::from_secs(30), |e| {
        matches!(e, SyncEvent::ReconnectExhausted { .. })
    })
    .await;
    assert_eq!(exhausted, SyncEvent::ReconnectExhausted { attempts: 3 });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = h.handle.status();
    assert!(!status.reconnecting);
    assert_eq!(status.status_text, "Disconnected");
}

#[tokio::test(start_paused = true)]
async fn strict_session_ends_once_on_link_loss() {
    let mut cfg = config();
    cfg.session = SessionConfig::strict().with_device_seed("0badf00d");
    let mut h = start(SimulatedLinkConfig::default(), cfg).await;
    connect(&mut h).await;

    h.handle.start_session("clip", "").await.unwrap();
    expect_event(&mut h.events, Duration::from_secs(2), |e| {
        matches!(e, SyncEvent::SessionStarted { .. })
    })
    .await;

    h.companion.set_connect_behavior(ConnectBehavior::Refuse);
    h.companion.drop_link("out of range");
    expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::SessionEnded { reason, .. } if reason == "LINK_LOST")
    })
    .await;

    // Let recovery run to exhaustion; no second end is reported
    let mut extra_ends = 0;
    let _ = timeout(Duration::from_secs(30), async {
        loop {
            match h.events.recv().await {
                Ok(SyncEvent::SessionEnded { .. }) => extra_ends += 1,
                Ok(SyncEvent::ReconnectExhausted { .. }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
    .await;
    assert_eq!(extra_ends, 0);
    assert_eq!(
        h.recorder
            .calls()
            .iter()
            .filter(|c| **c == RecorderCall::End)
            .count(),
        1
    );
}

// ----------------------------------------------------------------------------
// Sensor Stream
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sensor_rows_and_raw_lines_reach_observers() {
    let mut h = start(SimulatedLinkConfig::default(), config()).await;
    connect(&mut h).await;

    h.companion
        .notify_line("10:00:00,72.0,41.25,55.10,Low,0.010,-0.020,0.980");
    let event = expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::Sensor(_))
    })
    .await;
    let SyncEvent::Sensor(reading) = event else {
        unreachable!();
    };
    assert_eq!(reading.heart_rate, Some(72.0));
    assert_eq!(reading.stress_level.as_deref(), Some("Low"));

    h.companion.notify_line("hello from the wrist");
    expect_event(&mut h.events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::RawMessage(text) if text == "hello from the wrist")
    })
    .await;
}
