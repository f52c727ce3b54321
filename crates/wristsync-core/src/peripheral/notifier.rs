//! Periodic CSV row notifications
//!
//! A new subscriber receives the header row once. Every write interval the
//! latest [`SensorSnapshot`] is rendered as one row and delivered to every
//! subscriber as chunks of at most `max_notify_bytes`. Rows are computed even
//! with no subscriber so that the snapshot keeps rolling forward.

use tracing::{debug, info};

use crate::config::NotifierConfig;
use crate::peripheral::hrv::HrvWindow;
use crate::protocol::constants::CSV_HEADER;
use crate::protocol::csv::SensorReading;
use crate::protocol::framing::chunk_payload;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Latest sensor values; each update overwrites the previous one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub heart_rate: Option<f32>,
    pub rmssd: Option<f64>,
    pub sdnn: Option<f64>,
    pub stress_level: Option<String>,
    pub acceleration: [f32; 3],
}

impl SensorSnapshot {
    fn to_reading(&self, at: Timestamp) -> SensorReading {
        SensorReading {
            timestamp: at.to_clock_time(),
            heart_rate: self.heart_rate,
            rmssd: self.rmssd,
            sdnn: self.sdnn,
            stress_level: self.stress_level.clone(),
            acceleration: self.acceleration,
        }
    }
}

/// One chunk addressed to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub peer: String,
    pub chunk: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Notifier
// ----------------------------------------------------------------------------

pub struct PeripheralNotifier {
    config: NotifierConfig,
    snapshot: SensorSnapshot,
    hrv: HrvWindow,
    subscribers: Vec<String>,
    next_write_at: Option<Timestamp>,
    last_row: Option<String>,
    rows_computed: u64,
    rows_delivered: u64,
}

impl PeripheralNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        let hrv = HrvWindow::new(config.rr_window);
        Self {
            config,
            snapshot: SensorSnapshot::default(),
            hrv,
            subscribers: Vec::new(),
            next_write_at: None,
            last_row: None,
            rows_computed: 0,
            rows_delivered: 0,
        }
    }

    /// Register a subscriber; only a new subscription gets the header
    pub fn subscribe(&mut self, peer: impl Into<String>) -> Vec<Notification> {
        let peer = peer.into();
        if self.subscribers.contains(&peer) {
            debug!("Peer {} re-subscribed, header already sent", peer);
            return Vec::new();
        }
        info!("Peer {} subscribed to sensor rows", peer);
        let header = self.chunks_for(&peer, CSV_HEADER.as_bytes());
        self.subscribers.push(peer);
        header
    }

    pub fn unsubscribe(&mut self, peer: &str) {
        if let Some(pos) = self.subscribers.iter().position(|p| p == peer) {
            self.subscribers.remove(pos);
            info!("Peer {} unsubscribed", peer);
        }
    }

    pub fn subscribers(&self) -> &[String] {
        &self.subscribers
    }

    /// New heart-rate sample; also feeds the HRV window
    pub fn update_heart_rate(&mut self, bpm: f32) {
        self.snapshot.heart_rate = Some(bpm);
        self.hrv.push_heart_rate(bpm);
        self.snapshot.rmssd = self.hrv.rmssd();
        self.snapshot.sdnn = self.hrv.sdnn();
    }

    /// Measured RR interval from a beat-to-beat sensor
    pub fn update_rr_interval(&mut self, rr_ms: f64) {
        self.hrv.push_interval(rr_ms);
        self.snapshot.rmssd = self.hrv.rmssd();
        self.snapshot.sdnn = self.hrv.sdnn();
    }

    pub fn update_acceleration(&mut self, acceleration: [f32; 3]) {
        self.snapshot.acceleration = acceleration;
    }

    pub fn update_stress_level(&mut self, level: Option<String>) {
        self.snapshot.stress_level = level;
    }

    /// Replace the whole snapshot
    pub fn set_snapshot(&mut self, snapshot: SensorSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }

    /// Emit a row when the write interval has elapsed
    ///
    /// The first call only arms the timer.
    pub fn poll(&mut self, now: Timestamp) -> Vec<Notification> {
        let due = match self.next_write_at {
            None => {
                self.next_write_at = Some(now + self.config.write_interval);
                return Vec::new();
            }
            Some(due) => due,
        };
        if now < due {
            return Vec::new();
        }
        self.next_write_at = Some(now + self.config.write_interval);

        let row = self.snapshot.to_reading(now).to_csv_row();
        self.rows_computed += 1;
        debug!("Row={}", row.trim_end());

        let notifications = if self.subscribers.is_empty() {
            Vec::new()
        } else {
            self.rows_delivered += 1;
            self.subscribers
                .iter()
                .flat_map(|peer| self.chunks_for(peer, row.as_bytes()))
                .collect()
        };
        self.last_row = Some(row);
        notifications
    }

    /// Most recently computed row, delivered or not
    pub fn last_row(&self) -> Option<&str> {
        self.last_row.as_deref()
    }

    /// Rows computed and rows delivered to at least one subscriber
    pub fn counts(&self) -> (u64, u64) {
        (self.rows_computed, self.rows_delivered)
    }

    fn chunks_for(&self, peer: &str, bytes: &[u8]) -> Vec<Notification> {
        chunk_payload(bytes, self.config.max_notify_bytes)
            .map(|chunk| Notification {
                peer: peer.to_string(),
                chunk: chunk.to_vec(),
            })
            .collect()
    }
}
