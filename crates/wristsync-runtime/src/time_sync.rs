//! Time Synchronization Engine
//!
//! One round trip: the headset sends `TIME_SYNC_REQUEST` with its epoch
//! milliseconds, the companion replies with `{deviceTimestamp,
//! receivedTimestamp, sentTimestamp}` where `receivedTimestamp` echoes the
//! request. The offset keeps only the latest estimate.

use tracing::{debug, info, warn};
use wristsync_core::protocol::{TimeSyncRequest, TimeSyncResponse};
use wristsync_core::{MessageType, ProtocolError, StructuredMessage, TimeSyncConfig, Timestamp};

/// Result of one successful round trip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockEstimate {
    /// Companion clock minus headset clock, seconds
    pub offset_secs: f64,
    pub round_trip_ms: i64,
    /// `|offset| <= max_offset_secs`
    pub within_threshold: bool,
}

/// `(offset_secs, round_trip_ms)` from one response observed at `local_now`
pub fn compute_offset(device_timestamp: i64, received_timestamp: i64, local_now: i64) -> (f64, i64) {
    let round_trip = local_now - received_timestamp;
    let offset = ((device_timestamp - local_now) as f64 + round_trip as f64 / 2.0) / 1000.0;
    (offset, round_trip)
}

#[derive(Debug)]
pub struct TimeSyncEngine {
    config: TimeSyncConfig,
    estimate: Option<ClockEstimate>,
    requests_sent: u64,
    responses_received: u64,
    last_request_at: Option<Timestamp>,
}

impl TimeSyncEngine {
    pub fn new(config: TimeSyncConfig) -> Self {
        Self {
            config,
            estimate: None,
            requests_sent: 0,
            responses_received: 0,
            last_request_at: None,
        }
    }

    /// Build a `TIME_SYNC_REQUEST` stamped with `now`
    pub fn request_sync(
        &mut self,
        session_id: &str,
        now: Timestamp,
    ) -> Result<StructuredMessage, ProtocolError> {
        let message = StructuredMessage::with_json_payload(
            MessageType::TimeSyncRequest,
            session_id,
            &TimeSyncRequest {
                timestamp: now.as_millis(),
            },
            now,
        )?;
        self.requests_sent += 1;
        self.last_request_at = Some(now);
        debug!("Requesting time sync at {}", now.as_millis());
        Ok(message)
    }

    /// Fold a `TIME_SYNC_RESPONSE` into the estimate
    pub fn handle_response(
        &mut self,
        message: &StructuredMessage,
        now: Timestamp,
    ) -> Result<ClockEstimate, ProtocolError> {
        let response: TimeSyncResponse = message.decode_payload()?;
        let (offset_secs, round_trip_ms) = compute_offset(
            response.device_timestamp,
            response.received_timestamp,
            now.as_signed_millis(),
        );
        let within_threshold = offset_secs.abs() <= self.config.max_offset_secs;
        let estimate = ClockEstimate {
            offset_secs,
            round_trip_ms,
            within_threshold,
        };

        self.responses_received += 1;
        self.estimate = Some(estimate);
        if within_threshold {
            info!("Clock offset {:.3}s (rtt {}ms)", offset_secs, round_trip_ms);
        } else {
            warn!(
                "Clock offset {:.3}s exceeds {:.3}s (rtt {}ms)",
                offset_secs, self.config.max_offset_secs, round_trip_ms
            );
        }
        Ok(estimate)
    }

    pub fn estimate(&self) -> Option<ClockEstimate> {
        self.estimate
    }

    /// Latest offset in seconds, zero before the first round trip
    pub fn offset_secs(&self) -> f64 {
        self.estimate.map(|e| e.offset_secs).unwrap_or(0.0)
    }

    /// Headset time corrected into the companion's clock, epoch ms
    pub fn synchronized_timestamp(&self, now: Timestamp) -> i64 {
        now.as_signed_millis() + (self.offset_secs() * 1000.0).round() as i64
    }

    /// Peer confirmed and the offset is within tolerance
    pub fn is_synchronized(&self, peer_synced: bool) -> bool {
        peer_synced
            && self
                .estimate
                .is_some_and(|e| e.offset_secs.abs() < self.config.max_offset_secs)
    }

    pub fn last_request_at(&self) -> Option<Timestamp> {
        self.last_request_at
    }

    /// Requests sent and responses processed
    pub fn counts(&self) -> (u64, u64) {
        (self.requests_sent, self.responses_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(device: i64, received: i64) -> StructuredMessage {
        StructuredMessage::with_json_payload(
            MessageType::TimeSyncResponse,
            "",
            &TimeSyncResponse {
                device_timestamp: device,
                received_timestamp: received,
                sent_timestamp: device,
            },
            Timestamp::new(0),
        )
        .unwrap()
    }

    #[test]
    fn offset_formula_example() {
        let (offset, rtt) = compute_offset(1000, 900, 950);
        assert_eq!(rtt, 50);
        assert!((offset - 0.075).abs() < 1e-12);
    }

    #[test]
    fn response_updates_estimate() {
        let mut engine = TimeSyncEngine::new(TimeSyncConfig::default());
        let estimate = engine
            .handle_response(&response(1000, 900), Timestamp::new(950))
            .unwrap();
        assert!(estimate.within_threshold);
        assert_eq!(engine.synchronized_timestamp(Timestamp::new(2_000)), 2_075);
        assert!(engine.is_synchronized(true));
        assert!(!engine.is_synchronized(false));
    }

    #[test]
    fn large_offset_is_flagged_but_kept() {
        let mut engine = TimeSyncEngine::new(TimeSyncConfig::default());
        let estimate = engine
            .handle_response(&response(10_000, 900), Timestamp::new(1_000))
            .unwrap();
        assert!(!estimate.within_threshold);
        assert!(engine.offset_secs() > 9.0);
        assert!(!engine.is_synchronized(true));
    }

    #[test]
    fn malformed_response_is_an_error() {
        let mut engine = TimeSyncEngine::new(TimeSyncConfig::default());
        let bad = StructuredMessage::new(MessageType::TimeSyncResponse, "", "oops", Timestamp::new(0));
        assert!(engine.handle_response(&bad, Timestamp::new(1)).is_err());
        assert!(engine.estimate().is_none());
    }

    #[test]
    fn request_carries_epoch_millis() {
        let mut engine = TimeSyncEngine::new(TimeSyncConfig::default());
        let request = engine.request_sync("VR_1", Timestamp::new(1_234)).unwrap();
        assert_eq!(request.kind(), &MessageType::TimeSyncRequest);
        let body: TimeSyncRequest = request.decode_payload().unwrap();
        assert_eq!(body.timestamp, 1_234);
        assert_eq!(engine.counts(), (1, 0));
    }
}
