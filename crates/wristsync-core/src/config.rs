//! Centralized Configuration Management
//!
//! All tunables of the sync stack live here so that the CLI can load a single
//! [`SyncConfig`] from disk and hand sub-configs to each component.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, SyncError};
use crate::protocol::constants::{
    COMMAND_CHARACTERISTIC_UUID, CSV_CHARACTERISTIC_UUID, MAX_NOTIFY_BYTES, SERVICE_UUID,
};

// ----------------------------------------------------------------------------
// Link Configuration
// ----------------------------------------------------------------------------

/// Radio link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum time to wait for connect confirmation
    pub connect_timeout: Duration,
    /// Scans stop on their own after this long
    pub scan_timeout: Duration,
    /// Largest single write the link accepts
    pub max_payload: usize,
    /// Service advertised by the companion
    pub service_uuid: Uuid,
    /// Notify characteristic carrying CSV rows and structured replies
    pub data_characteristic_uuid: Uuid,
    /// Write characteristic for structured commands
    pub command_characteristic_uuid: Uuid,
    /// Optional advertised-name filter applied on top of the service filter
    pub device_name_filter: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(10),
            max_payload: MAX_NOTIFY_BYTES,
            service_uuid: SERVICE_UUID,
            data_characteristic_uuid: CSV_CHARACTERISTIC_UUID,
            command_characteristic_uuid: COMMAND_CHARACTERISTIC_UUID,
            device_name_filter: None,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set maximum write size
    pub fn with_max_payload(mut self, size: usize) -> Self {
        self.max_payload = size;
        self
    }

    /// Only accept companions whose advertised name contains `filter`
    pub fn with_device_name_filter(mut self, filter: impl Into<String>) -> Self {
        self.device_name_filter = Some(filter.into());
        self
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Configuration
// ----------------------------------------------------------------------------

/// Liveness probing and reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between PINGs while connected
    pub interval: Duration,
    /// Link is declared lost after `interval * stale_multiplier` of silence
    pub stale_multiplier: u32,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Backoff for attempt `n` is `n * reconnect_base_delay`
    pub reconnect_base_delay: Duration,
    /// Number of latency samples in the rolling average
    pub latency_window: usize,
    /// Schedule reconnects after the link is lost
    pub auto_reconnect: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            stale_multiplier: 3,
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(2),
            latency_window: 10,
            auto_reconnect: true,
        }
    }
}

impl HeartbeatConfig {
    /// Silence after which the link is considered lost
    pub fn stale_after(&self) -> Duration {
        self.interval
            .checked_mul(self.stale_multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// Backoff before reconnect attempt `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay
            .checked_mul(attempt)
            .unwrap_or(Duration::MAX)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}

// ----------------------------------------------------------------------------
// Time Sync Configuration
// ----------------------------------------------------------------------------

/// Clock offset estimation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// Offsets larger than this (seconds) are flagged as poor quality
    pub max_offset_secs: f64,
    /// Request a sync as soon as the link comes up
    pub sync_on_connect: bool,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            max_offset_secs: 0.5,
            sync_on_connect: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Session handshake policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refuse to record unless the companion acknowledges the session
    pub require_peer_confirmation: bool,
    /// SYNC_START sends before giving up
    pub retry_attempts: u32,
    /// Wait for SYNC_ACK per attempt
    pub sync_timeout: Duration,
    /// Pause between a timed-out attempt and the next send
    pub retry_delay: Duration,
    /// Capacity of the sync event log
    pub history_capacity: usize,
    /// Prefix of generated session ids
    pub session_prefix: String,
    /// Device-unique seed; derived from the hostname when absent
    pub device_seed: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            require_peer_confirmation: false,
            retry_attempts: 3,
            sync_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_millis(500),
            history_capacity: 50,
            session_prefix: "VR".to_string(),
            device_seed: None,
        }
    }
}

impl SessionConfig {
    /// Require the companion for every recording
    pub fn strict() -> Self {
        Self {
            require_peer_confirmation: true,
            ..Self::default()
        }
    }

    pub fn with_require_peer_confirmation(mut self, required: bool) -> Self {
        self.require_peer_confirmation = required;
        self
    }

    pub fn with_device_seed(mut self, seed: impl Into<String>) -> Self {
        self.device_seed = Some(seed.into());
        self
    }
}

// ----------------------------------------------------------------------------
// Notifier Configuration
// ----------------------------------------------------------------------------

/// Companion-side row emission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Interval between data rows
    pub write_interval: Duration,
    /// Largest single notification
    pub max_notify_bytes: usize,
    /// RR intervals kept for HRV computation
    pub rr_window: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            write_interval: Duration::from_secs(10),
            max_notify_bytes: MAX_NOTIFY_BYTES,
            rr_window: 300,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes and drain cadence for the engine task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Command channel buffer size
    pub command_buffer_size: usize,
    /// Inbound radio event queue size
    pub radio_event_buffer_size: usize,
    /// Outbound radio effect buffer size
    pub effect_buffer_size: usize,
    /// Observer broadcast capacity
    pub event_buffer_size: usize,
    /// Period of the inbound drain and timer poll
    pub drain_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            radio_event_buffer_size: 512,
            effect_buffer_size: 128,
            event_buffer_size: 256,
            drain_interval: Duration::from_millis(10),
        }
    }
}

impl ChannelConfig {
    /// Small buffers for tests
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 8,
            radio_event_buffer_size: 64,
            effect_buffer_size: 32,
            event_buffer_size: 128,
            drain_interval: Duration::from_millis(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Aggregate Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a sync engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub link: LinkConfig,
    pub heartbeat: HeartbeatConfig,
    pub time_sync: TimeSyncConfig,
    pub session: SessionConfig,
    pub notifier: NotifierConfig,
    pub channels: ChannelConfig,
}

impl SyncConfig {
    /// Tight timings for tests and simulation
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            ..Self::default()
        }
    }

    /// Reject values that would stall or spin the state machines
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(SyncError::Configuration {
                reason: reason.to_string(),
            })
        };

        if self.link.max_payload == 0 || self.notifier.max_notify_bytes == 0 {
            return invalid("payload sizes must be non-zero");
        }
        if self.heartbeat.interval.is_zero() || self.heartbeat.stale_multiplier == 0 {
            return invalid("heartbeat interval and stale multiplier must be non-zero");
        }
        let longest_backoff = self
            .heartbeat
            .reconnect_base_delay
            .checked_mul(self.heartbeat.max_reconnect_attempts.max(1));
        if self.heartbeat.interval.checked_mul(self.heartbeat.stale_multiplier).is_none()
            || longest_backoff.is_none()
        {
            return invalid("heartbeat timing overflows");
        }
        if self.heartbeat.latency_window == 0 {
            return invalid("latency window must hold at least one sample");
        }
        if self.session.retry_attempts == 0 {
            return invalid("session handshake needs at least one attempt");
        }
        if self.session.history_capacity == 0 {
            return invalid("sync event log capacity must be non-zero");
        }
        if self.channels.drain_interval.is_zero() {
            return invalid("drain interval must be non-zero");
        }
        if self.time_sync.max_offset_secs <= 0.0 {
            return invalid("max clock offset must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.link.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat.stale_after(), Duration::from_secs(6));
        assert_eq!(config.heartbeat.backoff_for(3), Duration::from_secs(6));
        assert_eq!(config.session.sync_timeout, Duration::from_secs(3));
        assert_eq!(config.session.history_capacity, 50);
        assert_eq!(config.notifier.max_notify_bytes, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = SyncConfig::default();
        config.session.retry_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(SyncError::Configuration { .. })
        ));
    }

    #[test]
    fn oversized_heartbeat_timing_saturates_and_fails_validation() {
        let mut config = SyncConfig::default();
        config.heartbeat.interval = Duration::from_secs(u64::MAX / 2);
        config.heartbeat.reconnect_base_delay = Duration::from_secs(u64::MAX / 2);
        assert_eq!(config.heartbeat.stale_after(), Duration::MAX);
        assert_eq!(config.heartbeat.backoff_for(u32::MAX), Duration::MAX);
        assert!(matches!(
            config.validate(),
            Err(SyncError::Configuration { .. })
        ));
    }

    #[test]
    fn partial_toml_like_json_falls_back_to_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"session":{"require_peer_confirmation":true,"retry_attempts":5,"sync_timeout":{"secs":1,"nanos":0},"retry_delay":{"secs":0,"nanos":0},"history_capacity":10,"session_prefix":"VR","device_seed":null}}"#)
                .unwrap();
        assert!(config.session.require_peer_confirmation);
        assert_eq!(config.session.retry_attempts, 5);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(2));
    }
}
