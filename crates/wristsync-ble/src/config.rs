//! BLE link configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wristsync_core::{LinkConfig, NotifierConfig, SyncConfig};

// ----------------------------------------------------------------------------
// Central Configuration
// ----------------------------------------------------------------------------

/// Settings for the headset-side central link
///
/// Timeouts are enforced by the sync engine, so only radio details live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleLinkConfig {
    /// Service the companion advertises; also the scan filter
    pub service_uuid: Uuid,
    /// Notify characteristic carrying rows and replies
    pub data_characteristic_uuid: Uuid,
    /// Write characteristic for structured commands
    pub command_characteristic_uuid: Uuid,
    /// Largest single write
    pub max_payload: usize,
    /// Advertised-name filter applied on top of the service filter
    pub device_name_filter: Option<String>,
    /// Which adapter to use when the host has several
    pub adapter_index: usize,
    /// Use acknowledged writes instead of write-without-response
    pub write_with_response: bool,
}

impl Default for BleLinkConfig {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for BleLinkConfig {
    fn from(link: &LinkConfig) -> Self {
        Self {
            service_uuid: link.service_uuid,
            data_characteristic_uuid: link.data_characteristic_uuid,
            command_characteristic_uuid: link.command_characteristic_uuid,
            max_payload: link.max_payload,
            device_name_filter: link.device_name_filter.clone(),
            adapter_index: 0,
            write_with_response: false,
        }
    }
}

impl BleLinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the adapter by position in the host's adapter list
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    pub fn with_write_with_response(mut self, enabled: bool) -> Self {
        self.write_with_response = enabled;
        self
    }

    /// Whether an advertised name passes the name filter
    ///
    /// Unnamed devices pass only when no filter is set.
    pub fn accepts_name(&self, name: Option<&str>) -> bool {
        match (&self.device_name_filter, name) {
            (None, _) => true,
            (Some(filter), Some(name)) => name.to_lowercase().contains(&filter.to_lowercase()),
            (Some(_), None) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Companion Server Configuration
// ----------------------------------------------------------------------------

/// Settings for the wrist-side GATT server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionServerConfig {
    /// Name put in the advertisement
    pub local_name: String,
    pub service_uuid: Uuid,
    pub data_characteristic_uuid: Uuid,
    pub command_characteristic_uuid: Uuid,
    /// Row cadence and chunking
    pub notifier: NotifierConfig,
    /// HEARTBEAT cadence while a session is joined
    pub heartbeat_interval: Duration,
    /// Report ready to SYNC_START
    pub ready: bool,
}

impl Default for CompanionServerConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CompanionServerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            local_name: "WristSync Companion".to_string(),
            service_uuid: config.link.service_uuid,
            data_characteristic_uuid: config.link.data_characteristic_uuid,
            command_characteristic_uuid: config.link.command_characteristic_uuid,
            notifier: config.notifier.clone(),
            heartbeat_interval: config.heartbeat.interval,
            ready: true,
        }
    }
}

impl CompanionServerConfig {
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wristsync_core::protocol::{COMMAND_CHARACTERISTIC_UUID, CSV_CHARACTERISTIC_UUID};

    #[test]
    fn link_settings_carry_over() {
        let link = LinkConfig::new()
            .with_max_payload(20)
            .with_device_name_filter("Watch");
        let config = BleLinkConfig::from(&link).with_adapter_index(1);
        assert_eq!(config.max_payload, 20);
        assert_eq!(config.adapter_index, 1);
        assert_eq!(config.data_characteristic_uuid, CSV_CHARACTERISTIC_UUID);
        assert_eq!(config.command_characteristic_uuid, COMMAND_CHARACTERISTIC_UUID);
        assert!(!config.write_with_response);
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        let config = BleLinkConfig::from(&LinkConfig::new().with_device_name_filter("watch"));
        assert!(config.accepts_name(Some("WristSync Watch")));
        assert!(!config.accepts_name(Some("Headphones")));
        assert!(!config.accepts_name(None));
        assert!(BleLinkConfig::default().accepts_name(None));
    }

    #[test]
    fn companion_uses_notifier_settings() {
        let config = CompanionServerConfig::default().with_local_name("Test Watch");
        assert_eq!(config.local_name, "Test Watch");
        assert_eq!(config.notifier.max_notify_bytes, 180);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert!(config.ready);
    }
}
