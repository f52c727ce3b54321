//! Core types: timestamps, time sources and link state

use core::fmt;
use core::ops::{Add, Sub};
use core::time::Duration;

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        let millis = u64::try_from(other.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(millis))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds as a signed value for offset arithmetic
    pub fn as_signed_millis(&self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }

    /// Whether at least `window` has elapsed between `since` and `self`
    pub fn has_elapsed(&self, since: Self, window: Duration) -> bool {
        self.duration_since(since) >= window
    }

    /// ISO-8601 rendering in UTC with millisecond precision
    pub fn to_iso8601(&self) -> String {
        self.to_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Local wall-clock time of day as `HH:MM:SS`
    pub fn to_clock_time(&self) -> String {
        Local
            .timestamp_millis_opt(self.as_signed_millis())
            .single()
            .map(|dt| dt.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "00:00:00".to_string())
    }

    /// UTC date-time view of this timestamp
    pub fn to_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.as_signed_millis()).unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso8601())
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of the current time for every state machine
///
/// State machines never read the clock themselves; they are handed a
/// `TimeSource` so that tests can drive time explicitly.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of [`TimeSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Lifecycle of the single companion link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "Idle",
            LinkState::Scanning => "Scanning",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic_saturates() {
        let a = Timestamp::new(1_000);
        let b = Timestamp::new(4_000);
        assert_eq!(b - a, 3_000);
        assert_eq!(a - b, 0);
        assert_eq!(a + Duration::from_secs(2), Timestamp::new(3_000));
        assert!(b.has_elapsed(a, Duration::from_secs(3)));
        assert!(!b.has_elapsed(a, Duration::from_millis(3_001)));
    }

    #[test]
    fn iso8601_uses_utc_millis() {
        let ts = Timestamp::new(1_700_000_000_123);
        assert_eq!(ts.to_iso8601(), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn clock_time_is_hh_mm_ss() {
        let rendered = Timestamp::new(1_700_000_000_000).to_clock_time();
        assert_eq!(rendered.len(), 8);
        assert_eq!(rendered.matches(':').count(), 2);
    }
}
