//! Time source backed by the tokio clock
//!
//! Epoch milliseconds captured at construction plus tokio's monotonic elapsed
//! time. Under a paused runtime (`start_paused = true`) the clock only moves
//! when the test advances it, so timers in the engine line up with
//! `tokio::time::advance`.

use tokio::time::Instant;
use wristsync_core::{TimeSource, Timestamp};

#[derive(Debug, Clone, Copy)]
pub struct TokioTimeSource {
    base: Timestamp,
    origin: Instant,
}

impl TokioTimeSource {
    pub fn new() -> Self {
        Self::starting_at(Timestamp::now())
    }

    pub fn starting_at(base: Timestamp) -> Self {
        Self {
            base,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now(&self) -> Timestamp {
        self.base + self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_paused_clock() {
        let clock = TokioTimeSource::starting_at(Timestamp::new(1_000));
        assert_eq!(clock.now(), Timestamp::new(1_000));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now(), Timestamp::new(1_250));
    }
}
