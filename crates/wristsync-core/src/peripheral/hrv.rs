//! Heart-rate variability over a bounded window of RR intervals

use std::collections::VecDeque;

/// Rolling RR-interval window in milliseconds
#[derive(Debug, Clone)]
pub struct HrvWindow {
    intervals: VecDeque<f64>,
    capacity: usize,
}

impl HrvWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Record one RR interval, evicting the oldest when full
    pub fn push_interval(&mut self, rr_ms: f64) {
        if !rr_ms.is_finite() || rr_ms <= 0.0 {
            return;
        }
        if self.intervals.len() == self.capacity {
            self.intervals.pop_front();
        }
        self.intervals.push_back(rr_ms);
    }

    /// Derive an RR interval from an instantaneous heart rate
    pub fn push_heart_rate(&mut self, bpm: f32) {
        if bpm > 0.0 {
            self.push_interval(60_000.0 / f64::from(bpm));
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Root mean square of successive differences
    pub fn rmssd(&self) -> Option<f64> {
        if self.intervals.len() < 2 {
            return None;
        }
        let (sum, count) = self
            .intervals
            .iter()
            .zip(self.intervals.iter().skip(1))
            .fold((0.0, 0usize), |(sum, count), (a, b)| {
                (sum + (b - a).powi(2), count + 1)
            });
        Some((sum / count as f64).sqrt())
    }

    /// Standard deviation of RR intervals
    pub fn sdnn(&self) -> Option<f64> {
        if self.intervals.len() < 2 {
            return None;
        }
        let n = self.intervals.len() as f64;
        let mean = self.intervals.iter().sum::<f64>() / n;
        let variance = self.intervals.iter().map(|rr| (rr - mean).powi(2)).sum::<f64>() / n;
        Some(variance.sqrt())
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }
}
