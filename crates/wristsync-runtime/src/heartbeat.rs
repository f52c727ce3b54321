//! Heartbeat / Health Monitor
//!
//! While the link is up a `PING` goes out every interval and its id is kept in
//! the pending map until the matching `PONG` arrives. Any inbound traffic
//! counts as liveness. After `stale_multiplier` intervals of silence the link
//! is declared lost and reconnects are scheduled with linear backoff
//! (`attempt * base_delay`) until the budget runs out.
//!
//! Pending pings leave the map exactly once: on their PONG, when they outlive
//! the stale window, or when the link goes down.

use std::collections::{HashMap, VecDeque};

use core::time::Duration;
use smallvec::SmallVec;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wristsync_core::{HeartbeatConfig, Timestamp};

// ----------------------------------------------------------------------------
// Actions
// ----------------------------------------------------------------------------

/// What the engine must do after a heartbeat poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    SendPing { ping_id: Uuid },
    /// Silence exceeded the stale window
    LinkLost { silent_ms: u64 },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Backoff elapsed; reconnect now
    Reconnect { attempt: u32 },
    /// Automatic recovery gave up
    ReconnectExhausted { attempts: u32 },
}

pub type HeartbeatActions = SmallVec<[HeartbeatAction; 2]>;

/// Latency of one resolved ping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub latency_ms: u64,
    pub average_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Idle,
    Waiting { attempt: u32, at: Timestamp },
    InFlight { attempt: u32 },
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub pings_sent: u64,
    pub pongs_matched: u64,
    pub pongs_unmatched: u64,
    pub pings_expired: u64,
    pub links_lost: u64,
}

// ----------------------------------------------------------------------------
// Monitor
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    monitoring: bool,
    pending: HashMap<Uuid, Timestamp>,
    latencies: VecDeque<u64>,
    average_ms: f64,
    last_ping_at: Option<Timestamp>,
    last_inbound_at: Timestamp,
    recovery: Recovery,
    stats: HeartbeatStats,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            latencies: VecDeque::with_capacity(config.latency_window),
            config,
            monitoring: false,
            pending: HashMap::new(),
            average_ms: 0.0,
            last_ping_at: None,
            last_inbound_at: Timestamp::new(0),
            recovery: Recovery::Idle,
            stats: HeartbeatStats::default(),
        }
    }

    /// Link is up: start probing and reset the reconnect budget
    pub fn on_connected(&mut self, now: Timestamp) {
        self.monitoring = true;
        self.pending.clear();
        self.last_ping_at = None;
        self.last_inbound_at = now;
        if self.recovery != Recovery::Idle {
            info!("Link recovered");
        }
        self.recovery = Recovery::Idle;
    }

    /// Link went down
    ///
    /// A local disconnect stops monitoring; any other drop starts recovery.
    pub fn on_disconnected(&mut self, now: Timestamp, initiated_locally: bool) -> HeartbeatActions {
        let was_monitoring = self.monitoring;
        self.stop_monitoring();
        if initiated_locally {
            self.recovery = Recovery::Idle;
            return HeartbeatActions::new();
        }
        if was_monitoring {
            self.begin_recovery(now)
        } else {
            HeartbeatActions::new()
        }
    }

    /// A reconnect attempt failed; schedule the next one
    pub fn on_reconnect_failed(&mut self, now: Timestamp) -> HeartbeatActions {
        match self.recovery {
            Recovery::InFlight { attempt } => self.schedule(attempt + 1, now),
            _ => HeartbeatActions::new(),
        }
    }

    /// An explicit connect replaces automatic recovery
    pub fn cancel_reconnect(&mut self) {
        if matches!(self.recovery, Recovery::Waiting { .. } | Recovery::InFlight { .. }) {
            debug!("Reconnect schedule cancelled");
        }
        self.recovery = Recovery::Idle;
    }

    /// Any inbound traffic
    pub fn on_inbound(&mut self, now: Timestamp) {
        self.last_inbound_at = now;
    }

    /// Resolve a `PONG` whose payload is the ping id
    pub fn on_pong(&mut self, payload: &str, now: Timestamp) -> Option<LatencySample> {
        let Ok(ping_id) = Uuid::parse_str(payload.trim()) else {
            self.stats.pongs_unmatched += 1;
            debug!("PONG with unparseable id {:?}", payload);
            return None;
        };
        let Some(sent_at) = self.pending.remove(&ping_id) else {
            self.stats.pongs_unmatched += 1;
            debug!("PONG {} has no pending ping", ping_id);
            return None;
        };

        let latency_ms = now - sent_at;
        if self.latencies.len() == self.config.latency_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
        self.average_ms =
            self.latencies.iter().sum::<u64>() as f64 / self.latencies.len() as f64;
        self.stats.pongs_matched += 1;

        Some(LatencySample {
            latency_ms,
            average_ms: self.average_ms,
        })
    }

    /// Advance timers
    pub fn poll(&mut self, now: Timestamp) -> HeartbeatActions {
        let mut actions = HeartbeatActions::new();

        if self.monitoring {
            self.realign_after_step_back(now);
            let stale_after = self.config.stale_after();
            self.expire_pending(now, stale_after);

            let silent = now.duration_since(self.last_inbound_at);
            if silent > stale_after {
                warn!("No traffic for {}ms, link considered lost", silent.as_millis());
                self.stats.links_lost += 1;
                self.stop_monitoring();
                actions.push(HeartbeatAction::LinkLost {
                    silent_ms: silent.as_millis() as u64,
                });
                actions.extend(self.begin_recovery(now));
                return actions;
            }

            let due = self
                .last_ping_at
                .map_or(true, |at| now.has_elapsed(at, self.config.interval));
            if due {
                let ping_id = Uuid::new_v4();
                self.pending.insert(ping_id, now);
                self.last_ping_at = Some(now);
                self.stats.pings_sent += 1;
                actions.push(HeartbeatAction::SendPing { ping_id });
            }
        }

        if let Recovery::Waiting { attempt, at } = self.recovery {
            if now >= at {
                info!("Reconnect attempt {}/{}", attempt, self.config.max_reconnect_attempts);
                self.recovery = Recovery::InFlight { attempt };
                actions.push(HeartbeatAction::Reconnect { attempt });
            }
        }

        actions
    }

    fn begin_recovery(&mut self, now: Timestamp) -> HeartbeatActions {
        if !self.config.auto_reconnect {
            self.recovery = Recovery::Idle;
            return HeartbeatActions::new();
        }
        self.schedule(1, now)
    }

    fn schedule(&mut self, attempt: u32, now: Timestamp) -> HeartbeatActions {
        let mut actions = HeartbeatActions::new();
        if attempt > self.config.max_reconnect_attempts {
            warn!(
                "Reconnect budget of {} attempts exhausted",
                self.config.max_reconnect_attempts
            );
            self.recovery = Recovery::Exhausted;
            actions.push(HeartbeatAction::ReconnectExhausted {
                attempts: self.config.max_reconnect_attempts,
            });
            return actions;
        }
        let delay = self.config.backoff_for(attempt);
        self.recovery = Recovery::Waiting {
            attempt,
            at: now + delay,
        };
        actions.push(HeartbeatAction::ReconnectScheduled { attempt, delay });
        actions
    }

    fn expire_pending(&mut self, now: Timestamp, window: Duration) {
        let before = self.pending.len();
        self.pending.retain(|_, sent_at| !now.has_elapsed(*sent_at, window));
        let expired = before - self.pending.len();
        if expired > 0 {
            self.stats.pings_expired += expired as u64;
            debug!("Expired {} unanswered ping(s)", expired);
        }
    }

    /// Pull stored times back to `now` if the clock moved backwards, so
    /// silence is measured from the step instead of saturating to zero
    fn realign_after_step_back(&mut self, now: Timestamp) {
        if now >= self.last_inbound_at {
            return;
        }
        warn!(
            "Clock stepped back by {}ms, restarting silence window",
            self.last_inbound_at.duration_since(now).as_millis()
        );
        self.last_inbound_at = now;
        if let Some(at) = self.last_ping_at.as_mut() {
            *at = (*at).min(now);
        }
        for sent_at in self.pending.values_mut() {
            *sent_at = (*sent_at).min(now);
        }
    }

    fn stop_monitoring(&mut self) {
        self.monitoring = false;
        self.pending.clear();
        self.last_ping_at = None;
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self.recovery, Recovery::Waiting { .. } | Recovery::InFlight { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        self.recovery == Recovery::Exhausted
    }

    pub fn pending_pings(&self) -> usize {
        self.pending.len()
    }

    pub fn latency_samples(&self) -> impl Iterator<Item = &u64> {
        self.latencies.iter()
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.average_ms
    }

    pub fn stats(&self) -> HeartbeatStats {
        self.stats
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ping_id(actions: &HeartbeatActions) -> Uuid {
        actions
            .iter()
            .find_map(|a| match a {
                HeartbeatAction::SendPing { ping_id } => Some(*ping_id),
                _ => None,
            })
            .expect("ping sent")
    }

    fn connected_monitor(at: u64) -> HeartbeatMonitor {
        let mut monitor = HeartbeatMonitor::new(HeartbeatConfig::default());
        monitor.on_connected(Timestamp::new(at));
        monitor
    }

    #[test]
    fn pings_every_interval() {
        let mut monitor = connected_monitor(0);
        assert_eq!(monitor.poll(Timestamp::new(0)).len(), 1);
        assert!(monitor.poll(Timestamp::new(1_999)).is_empty());
        monitor.on_inbound(Timestamp::new(1_999));
        assert_eq!(monitor.poll(Timestamp::new(2_000)).len(), 1);
        assert_eq!(monitor.pending_pings(), 2);
    }

    #[test]
    fn pong_resolves_once() {
        let mut monitor = connected_monitor(0);
        let id = ping_id(&monitor.poll(Timestamp::new(0)));

        let sample = monitor.on_pong(&id.to_string(), Timestamp::new(40)).unwrap();
        assert_eq!(sample.latency_ms, 40);
        assert_eq!(sample.average_ms, 40.0);
        assert!(monitor.on_pong(&id.to_string(), Timestamp::new(45)).is_none());
        assert_eq!(monitor.latency_samples().count(), 1);
        assert_eq!(monitor.stats().pongs_unmatched, 1);
    }

    #[test]
    fn latency_window_keeps_last_ten() {
        let mut monitor = connected_monitor(0);
        let mut now = 0;
        for latency in 1..=12u64 {
            monitor.on_inbound(Timestamp::new(now));
            let id = ping_id(&monitor.poll(Timestamp::new(now)));
            monitor.on_pong(&id.to_string(), Timestamp::new(now + latency));
            now += 2_000;
        }
        let samples: Vec<u64> = monitor.latency_samples().copied().collect();
        assert_eq!(samples, (3..=12).collect::<Vec<_>>());
        assert_eq!(monitor.average_latency_ms(), 7.5);
    }

    #[test]
    fn silence_declares_link_lost_and_schedules_backoff() {
        let mut monitor = connected_monitor(0);
        monitor.poll(Timestamp::new(0));
        assert!(monitor
            .poll(Timestamp::new(6_000))
            .iter()
            .all(|a| matches!(a, HeartbeatAction::SendPing { .. })));

        let actions = monitor.poll(Timestamp::new(6_001));
        assert_eq!(actions[0], HeartbeatAction::LinkLost { silent_ms: 6_001 });
        assert_eq!(
            actions[1],
            HeartbeatAction::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(monitor.pending_pings(), 0);
        assert!(!monitor.is_monitoring());

        assert!(monitor.poll(Timestamp::new(8_000)).is_empty());
        assert_eq!(
            monitor.poll(Timestamp::new(8_001)).as_slice(),
            [HeartbeatAction::Reconnect { attempt: 1 }]
        );
    }

    #[test]
    fn backoff_grows_then_exhausts() {
        let mut monitor = connected_monitor(0);
        let mut now = Timestamp::new(0);
        let actions = monitor.on_disconnected(now, false);
        assert!(matches!(actions[0], HeartbeatAction::ReconnectScheduled { attempt: 1, .. }));

        for attempt in 1..=3u32 {
            now = now + Duration::from_secs(2 * attempt as u64);
            assert_eq!(
                monitor.poll(now).as_slice(),
                [HeartbeatAction::Reconnect { attempt }]
            );
            let next = monitor.on_reconnect_failed(now);
            if attempt < 3 {
                assert_eq!(
                    next.as_slice(),
                    [HeartbeatAction::ReconnectScheduled {
                        attempt: attempt + 1,
                        delay: Duration::from_secs(2 * (attempt as u64 + 1))
                    }]
                );
            } else {
                assert_eq!(
                    next.as_slice(),
                    [HeartbeatAction::ReconnectExhausted { attempts: 3 }]
                );
            }
        }
        assert!(monitor.is_exhausted());
        assert!(monitor.poll(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn local_disconnect_does_not_reconnect() {
        let mut monitor = connected_monitor(0);
        assert!(monitor.on_disconnected(Timestamp::new(10), true).is_empty());
        assert!(!monitor.is_recovering());
    }

    #[test]
    fn explicit_connect_cancels_recovery() {
        let mut monitor = connected_monitor(0);
        monitor.on_disconnected(Timestamp::new(0), false);
        monitor.cancel_reconnect();
        assert!(monitor.poll(Timestamp::new(10_000)).is_empty());
    }

    #[test]
    fn unanswered_pings_expire() {
        let mut monitor = connected_monitor(0);
        monitor.poll(Timestamp::new(0));
        monitor.on_inbound(Timestamp::new(5_000));
        monitor.poll(Timestamp::new(5_000));
        assert_eq!(monitor.pending_pings(), 2);
        monitor.on_inbound(Timestamp::new(6_000));
        monitor.poll(Timestamp::new(6_000));
        // first ping (t=0) expired at the 6s stale window; t=5000 remains
        assert_eq!(monitor.pending_pings(), 1);
        assert_eq!(monitor.stats().pings_expired, 1);
    }

    #[test]
    fn silence_detected_after_clock_steps_back() {
        let start = 1_700_000_000_000u64;
        let mut monitor = connected_monitor(start);
        monitor.poll(Timestamp::new(start));

        let stepped = start - 3_600_000;
        let mut lost = None;
        for second in 0..60u64 {
            let now = Timestamp::new(stepped + second * 1_000);
            if let Some(HeartbeatAction::LinkLost { silent_ms }) = monitor
                .poll(now)
                .into_iter()
                .find(|a| matches!(a, HeartbeatAction::LinkLost { .. }))
            {
                lost = Some((second, silent_ms));
                break;
            }
        }
        assert_eq!(lost, Some((7, 7_000)));
        assert_eq!(monitor.pending_pings(), 0);
    }

    proptest! {
        #[test]
        fn every_resolved_ping_counted_once(
            replies in proptest::collection::vec((any::<bool>(), any::<bool>(), 1u64..500), 1..40)
        ) {
            let mut monitor = connected_monitor(0);
            let mut now = 0u64;
            let mut resolved = 0usize;
            for (answer, duplicate, latency) in replies {
                monitor.on_inbound(Timestamp::new(now));
                let id = ping_id(&monitor.poll(Timestamp::new(now)));
                if answer {
                    prop_assert!(monitor.on_pong(&id.to_string(), Timestamp::new(now + latency)).is_some());
                    resolved += 1;
                    if duplicate {
                        prop_assert!(monitor.on_pong(&id.to_string(), Timestamp::new(now + latency)).is_none());
                    }
                }
                now += 2_000;
            }
            prop_assert_eq!(monitor.stats().pongs_matched as usize, resolved);
            prop_assert_eq!(monitor.latency_samples().count(), resolved.min(10));
        }
    }
}
