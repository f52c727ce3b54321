//! Link Manager
//!
//! Owns the [`LinkState`] of the single companion link. It never performs I/O:
//! requests become [`RadioEffect`]s for the radio task, and [`RadioEvent`]s
//! coming back are folded into state transitions reported as [`LinkEvent`]s.
//!
//! Every connect is tagged with an attempt number. Radio events carrying an
//! older attempt are ignored, so a fresh `connect` always supersedes whatever
//! was in flight.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use wristsync_core::{
    LinkConfig, LinkState, RadioEffect, RadioEvent, Result, Timestamp, TransportError,
};

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

/// Outcome of a link state change, consumed by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged { from: LinkState, to: LinkState },
    DeviceFound { address: String, name: Option<String> },
    Connected { address: String },
    Disconnected {
        address: String,
        reason: String,
        initiated_locally: bool,
    },
    ConnectFailed { address: String, error: TransportError },
}

// ----------------------------------------------------------------------------
// Link Manager
// ----------------------------------------------------------------------------

pub struct LinkManager {
    config: LinkConfig,
    state: LinkState,
    /// Target of the current connect, or the connected companion
    address: Option<String>,
    /// Remembered companion used when `connect` is given no address
    companion_address: Option<String>,
    attempt: u64,
    physically_connected: bool,
    state_entered_at: Timestamp,
    discovered: BTreeMap<String, Option<String>>,
    last_found: Option<String>,
    effects: Vec<RadioEffect>,
    events: Vec<LinkEvent>,
}

impl LinkManager {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: LinkState::Idle,
            address: None,
            companion_address: None,
            attempt: 0,
            physically_connected: false,
            state_entered_at: Timestamp::new(0),
            discovered: BTreeMap::new(),
            last_found: None,
            effects: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Connected companion or current connect target
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn companion_address(&self) -> Option<&str> {
        self.companion_address.as_deref()
    }

    /// Remember the companion used by address-less connects
    pub fn set_companion_address(&mut self, address: Option<String>) {
        self.companion_address = address.map(|a| normalize_address(&a));
    }

    /// Companions seen during the last scan
    pub fn discovered_devices(&self) -> &BTreeMap<String, Option<String>> {
        &self.discovered
    }

    pub fn last_found(&self) -> Option<&str> {
        self.last_found.as_deref()
    }

    pub fn current_attempt(&self) -> u64 {
        self.attempt
    }

    /// Effects queued for the radio since the last call
    pub fn take_effects(&mut self) -> Vec<RadioEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Events produced since the last call
    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    pub fn start_scan(&mut self, now: Timestamp) -> Result<()> {
        if self.state != LinkState::Idle {
            return Err(TransportError::ScanFailed {
                reason: format!("link is {}", self.state),
            }
            .into());
        }
        info!("Scanning for companions advertising {}", self.config.service_uuid);
        self.discovered.clear();
        self.last_found = None;
        self.set_state(LinkState::Scanning, now);
        self.effects.push(RadioEffect::StartScan);
        Ok(())
    }

    pub fn stop_scan(&mut self, now: Timestamp) {
        if self.state == LinkState::Scanning {
            self.effects.push(RadioEffect::StopScan);
            self.set_state(LinkState::Idle, now);
            info!("Scan stopped, {} companion(s) found", self.discovered.len());
        }
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    /// Begin connecting to `address`, the remembered companion, or the last
    /// device found by a scan, in that order
    pub fn connect(&mut self, address: Option<&str>, now: Timestamp) -> Result<()> {
        let target = address
            .map(normalize_address)
            .or_else(|| self.companion_address.clone())
            .or_else(|| self.last_found.clone())
            .ok_or(TransportError::NoAddress)?;

        if self.state == LinkState::Connected && self.address.as_deref() == Some(target.as_str()) {
            debug!("Already connected to {}", target);
            return Ok(());
        }

        match self.state {
            LinkState::Scanning => self.effects.push(RadioEffect::StopScan),
            LinkState::Connected => {
                let previous = self.address.clone().unwrap_or_default();
                self.effects.push(RadioEffect::Disconnect);
                self.events.push(LinkEvent::Disconnected {
                    address: previous,
                    reason: "superseded by new connect".to_string(),
                    initiated_locally: true,
                });
            }
            LinkState::Connecting | LinkState::Disconnecting => {
                if self.physically_connected {
                    self.effects.push(RadioEffect::Disconnect);
                }
                debug!("Superseding connect attempt {}", self.attempt);
            }
            LinkState::Idle => {}
        }

        self.attempt += 1;
        self.physically_connected = false;
        self.address = Some(target.clone());
        self.set_state(LinkState::Connecting, now);
        info!("Connecting to {} (attempt {})", target, self.attempt);
        self.effects.push(RadioEffect::Connect {
            address: target,
            attempt: self.attempt,
        });
        Ok(())
    }

    /// Local disconnect; completes when the radio confirms or on timeout
    pub fn disconnect(&mut self, now: Timestamp) {
        match self.state {
            LinkState::Connected | LinkState::Connecting => {
                info!("Disconnecting from {}", self.address.as_deref().unwrap_or("?"));
                self.effects.push(RadioEffect::Disconnect);
                self.set_state(LinkState::Disconnecting, now);
            }
            LinkState::Scanning => self.stop_scan(now),
            LinkState::Idle | LinkState::Disconnecting => {}
        }
    }

    /// Declare the link dead without waiting for the radio
    pub fn mark_lost(&mut self, reason: &str, now: Timestamp) {
        if self.state != LinkState::Connected {
            return;
        }
        warn!("Link to {} lost: {}", self.address.as_deref().unwrap_or("?"), reason);
        self.effects.push(RadioEffect::Disconnect);
        self.physically_connected = false;
        self.set_state(LinkState::Idle, now);
        self.events.push(LinkEvent::Disconnected {
            address: self.address.clone().unwrap_or_default(),
            reason: reason.to_string(),
            initiated_locally: false,
        });
    }

    /// Queue a frame for transmission
    pub fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        if self.state != LinkState::Connected {
            return Err(TransportError::NotConnected.into());
        }
        self.effects.push(RadioEffect::Write { data: frame });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Radio events
    // ------------------------------------------------------------------------

    /// Fold a radio event into the state machine
    ///
    /// `Data` is not handled here; the engine routes it directly.
    pub fn handle_radio_event(&mut self, event: &RadioEvent, now: Timestamp) {
        match event {
            RadioEvent::DeviceFound { address, name, .. } => {
                self.on_device_found(address, name.as_deref());
            }
            RadioEvent::ScanStopped => {
                if self.state == LinkState::Scanning {
                    self.set_state(LinkState::Idle, now);
                }
            }
            RadioEvent::Connected { attempt } => {
                if !self.is_current_attempt(*attempt) {
                    return;
                }
                debug!("Physical link up, discovering services");
                self.physically_connected = true;
                self.effects.push(RadioEffect::Discover { attempt: *attempt });
            }
            RadioEvent::Subscribed { attempt } => {
                if !self.is_current_attempt(*attempt) {
                    return;
                }
                let address = self.address.clone().unwrap_or_default();
                info!("Connected to {}", address);
                self.set_state(LinkState::Connected, now);
                self.events.push(LinkEvent::Connected { address });
            }
            RadioEvent::ConnectFailed { attempt, error } => {
                if !self.is_current_attempt(*attempt) {
                    return;
                }
                self.fail_connect(error.clone(), now);
            }
            RadioEvent::Disconnected { reason } => self.on_disconnected(reason, now),
            RadioEvent::Data(_) | RadioEvent::WriteFailed { .. } => {}
        }
    }

    /// Enforce connect, scan and disconnect timeouts
    pub fn poll(&mut self, now: Timestamp) {
        match self.state {
            LinkState::Connecting
                if now.has_elapsed(self.state_entered_at, self.config.connect_timeout) =>
            {
                let error = TransportError::ConnectTimeout {
                    address: self.address.clone().unwrap_or_default(),
                    duration_ms: self.config.connect_timeout.as_millis() as u64,
                };
                self.fail_connect(error, now);
            }
            LinkState::Scanning
                if now.has_elapsed(self.state_entered_at, self.config.scan_timeout) =>
            {
                self.stop_scan(now);
            }
            LinkState::Disconnecting
                if now.has_elapsed(self.state_entered_at, self.config.connect_timeout) =>
            {
                debug!("Radio did not confirm disconnect, resetting locally");
                self.on_disconnected("local disconnect", now);
            }
            _ => {}
        }
    }

    fn on_device_found(&mut self, address: &str, name: Option<&str>) {
        if let Some(filter) = &self.config.device_name_filter {
            if !name.is_some_and(|n| n.contains(filter.as_str())) {
                return;
            }
        }
        let address = normalize_address(address);
        if self.discovered.contains_key(&address) {
            return;
        }
        info!("Found companion {} ({})", name.unwrap_or("unnamed"), address);
        self.discovered.insert(address.clone(), name.map(str::to_string));
        self.last_found = Some(address.clone());
        self.events.push(LinkEvent::DeviceFound {
            address,
            name: name.map(str::to_string),
        });
    }

    fn on_disconnected(&mut self, reason: &str, now: Timestamp) {
        let previous = self.state;
        let address = self.address.clone().unwrap_or_default();
        match previous {
            LinkState::Connected | LinkState::Disconnecting => {
                self.physically_connected = false;
                self.set_state(LinkState::Idle, now);
                self.events.push(LinkEvent::Disconnected {
                    address,
                    reason: reason.to_string(),
                    initiated_locally: previous == LinkState::Disconnecting,
                });
            }
            LinkState::Connecting if !self.physically_connected => {
                debug!("Ignoring disconnect of a superseded link ({})", reason);
            }
            LinkState::Connecting => {
                self.fail_connect(
                    TransportError::ConnectFailed {
                        address,
                        reason: reason.to_string(),
                    },
                    now,
                );
            }
            LinkState::Idle | LinkState::Scanning => {
                debug!("Ignoring duplicate disconnect notification ({})", reason);
            }
        }
    }

    fn fail_connect(&mut self, error: TransportError, now: Timestamp) {
        warn!("Connect attempt {} failed: {}", self.attempt, error);
        if self.physically_connected {
            self.effects.push(RadioEffect::Disconnect);
        }
        self.physically_connected = false;
        self.set_state(LinkState::Idle, now);
        self.events.push(LinkEvent::ConnectFailed {
            address: self.address.clone().unwrap_or_default(),
            error,
        });
    }

    fn is_current_attempt(&self, attempt: u64) -> bool {
        let current = attempt == self.attempt && self.state == LinkState::Connecting;
        if !current {
            debug!(
                "Ignoring radio event for stale attempt {} (current {}, {})",
                attempt, self.attempt, self.state
            );
        }
        current
    }

    fn set_state(&mut self, to: LinkState, now: Timestamp) {
        let from = self.state;
        self.state_entered_at = now;
        if from != to {
            self.state = to;
            self.events.push(LinkEvent::StateChanged { from, to });
        }
    }
}

/// Canonical upper-case form of a device address
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn manager() -> LinkManager {
        LinkManager::new(LinkConfig::default())
    }

    fn connect_fully(link: &mut LinkManager, now: Timestamp) {
        link.connect(Some(ADDR), now).unwrap();
        let attempt = link.current_attempt();
        link.handle_radio_event(&RadioEvent::Connected { attempt }, now);
        link.handle_radio_event(&RadioEvent::Subscribed { attempt }, now);
    }

    #[test]
    fn connect_requires_subscription_before_connected() {
        let mut link = manager();
        let now = Timestamp::new(0);
        link.connect(Some("aa:bb:cc:dd:ee:ff"), now).unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(
            link.take_effects(),
            vec![RadioEffect::Connect {
                address: ADDR.to_string(),
                attempt: 1
            }]
        );

        link.handle_radio_event(&RadioEvent::Connected { attempt: 1 }, now);
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.take_effects(), vec![RadioEffect::Discover { attempt: 1 }]);
        assert!(link.send(b"x".to_vec()).is_err());

        link.handle_radio_event(&RadioEvent::Subscribed { attempt: 1 }, now);
        assert!(link.is_connected());
        assert!(link
            .take_events()
            .contains(&LinkEvent::Connected { address: ADDR.to_string() }));
        assert!(link.send(b"x".to_vec()).is_ok());
    }

    #[test]
    fn connect_times_out_into_idle() {
        let mut link = manager();
        let start = Timestamp::new(1_000);
        link.connect(Some(ADDR), start).unwrap();
        link.poll(start + Duration::from_millis(4_999));
        assert_eq!(link.state(), LinkState::Connecting);

        link.poll(start + Duration::from_secs(5));
        assert_eq!(link.state(), LinkState::Idle);
        assert!(link.take_events().iter().any(|e| matches!(
            e,
            LinkEvent::ConnectFailed {
                error: TransportError::ConnectTimeout { .. },
                ..
            }
        )));
    }

    #[test]
    fn discovery_failure_never_reports_connected() {
        let mut link = manager();
        let now = Timestamp::new(0);
        link.connect(Some(ADDR), now).unwrap();
        link.handle_radio_event(&RadioEvent::Connected { attempt: 1 }, now);
        link.take_effects();
        link.handle_radio_event(
            &RadioEvent::ConnectFailed {
                attempt: 1,
                error: TransportError::DiscoveryFailed {
                    reason: "no service".into(),
                },
            },
            now,
        );
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.take_effects(), vec![RadioEffect::Disconnect]);
        assert!(!link
            .take_events()
            .iter()
            .any(|e| matches!(e, LinkEvent::Connected { .. })));
    }

    #[test]
    fn new_connect_supersedes_in_flight_attempt() {
        let mut link = manager();
        let now = Timestamp::new(0);
        link.connect(Some(ADDR), now).unwrap();
        link.connect(Some("11:22:33:44:55:66"), now).unwrap();
        assert_eq!(link.current_attempt(), 2);

        // Late confirmation for the first attempt is ignored
        link.handle_radio_event(&RadioEvent::Subscribed { attempt: 1 }, now);
        assert_eq!(link.state(), LinkState::Connecting);

        link.handle_radio_event(&RadioEvent::Connected { attempt: 2 }, now);
        link.handle_radio_event(&RadioEvent::Subscribed { attempt: 2 }, now);
        assert_eq!(link.address(), Some("11:22:33:44:55:66"));
        assert!(link.is_connected());
    }

    #[test]
    fn reconnecting_elsewhere_survives_old_link_teardown() {
        let mut link = manager();
        let now = Timestamp::new(0);
        connect_fully(&mut link, now);
        link.take_effects();

        link.connect(Some("11:22:33:44:55:66"), now).unwrap();
        assert_eq!(link.take_effects()[0], RadioEffect::Disconnect);

        // Radio confirms teardown of the old link after the new attempt began
        link.handle_radio_event(&RadioEvent::Disconnected { reason: "local".into() }, now);
        assert_eq!(link.state(), LinkState::Connecting);

        link.handle_radio_event(&RadioEvent::Connected { attempt: 2 }, now);
        link.handle_radio_event(&RadioEvent::Subscribed { attempt: 2 }, now);
        assert!(link.is_connected());
    }

    #[test]
    fn duplicate_disconnects_reported_once() {
        let mut link = manager();
        let now = Timestamp::new(0);
        connect_fully(&mut link, now);
        link.take_events();

        link.handle_radio_event(&RadioEvent::Disconnected { reason: "peer".into() }, now);
        link.handle_radio_event(&RadioEvent::Disconnected { reason: "peer".into() }, now);
        let disconnects = link
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, LinkEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[test]
    fn mark_lost_then_radio_disconnect_is_single_event() {
        let mut link = manager();
        let now = Timestamp::new(0);
        connect_fully(&mut link, now);
        link.take_events();

        link.mark_lost("heartbeat timeout", now);
        link.handle_radio_event(&RadioEvent::Disconnected { reason: "peer".into() }, now);
        let events = link.take_events();
        let disconnects: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::Disconnected { .. }))
            .collect();
        assert_eq!(disconnects.len(), 1);
        assert!(matches!(
            disconnects[0],
            LinkEvent::Disconnected {
                initiated_locally: false,
                ..
            }
        ));
    }

    #[test]
    fn local_disconnect_completes_on_confirmation() {
        let mut link = manager();
        let now = Timestamp::new(0);
        connect_fully(&mut link, now);
        link.take_events();
        link.disconnect(now);
        assert_eq!(link.state(), LinkState::Disconnecting);
        link.handle_radio_event(&RadioEvent::Disconnected { reason: "local".into() }, now);
        assert!(link.take_events().contains(&LinkEvent::Disconnected {
            address: ADDR.to_string(),
            reason: "local".to_string(),
            initiated_locally: true,
        }));
    }

    #[test]
    fn scan_records_devices_and_times_out() {
        let mut link = manager();
        let start = Timestamp::new(0);
        link.start_scan(start).unwrap();
        assert!(link.start_scan(start).is_err());
        for _ in 0..2 {
            link.handle_radio_event(
                &RadioEvent::DeviceFound {
                    address: "aa:bb:cc:dd:ee:ff".into(),
                    name: Some("Galaxy Watch7".into()),
                    rssi: Some(-60),
                },
                start,
            );
        }
        assert_eq!(link.discovered_devices().len(), 1);
        assert_eq!(link.last_found(), Some(ADDR));

        link.poll(start + Duration::from_secs(10));
        assert_eq!(link.state(), LinkState::Idle);
        assert!(link.take_effects().contains(&RadioEffect::StopScan));

        // Connect with no address falls back to the last found device
        link.connect(None, start).unwrap();
        assert_eq!(link.address(), Some(ADDR));
    }

    #[test]
    fn connect_without_any_address_fails() {
        let mut link = manager();
        assert!(link.connect(None, Timestamp::new(0)).is_err());
        assert_eq!(link.state(), LinkState::Idle);
    }
}
