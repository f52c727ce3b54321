//! Bounded audit trail of handshake activity
//!
//! Diagnostic only; nothing reads it to make protocol decisions.

use std::collections::VecDeque;

use serde::Serialize;
use wristsync_core::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventKind {
    Handshake,
    HandshakeRetry,
    PeerNotReady,
    LocalStart,
    SessionEnd,
    LinkLost,
    PeerHeartbeat,
    PeerError,
    LabelChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncLogEntry {
    pub kind: SyncEventKind,
    pub session_id: String,
    pub timestamp: Timestamp,
    pub latency_ms: Option<u64>,
    pub success: bool,
    pub details: String,
}

/// Oldest entries are evicted once `capacity` is reached
#[derive(Debug, Clone)]
pub struct SyncEventLog {
    entries: VecDeque<SyncLogEntry>,
    capacity: usize,
}

impl SyncEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: SyncLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn record(
        &mut self,
        kind: SyncEventKind,
        session_id: &str,
        timestamp: Timestamp,
        latency_ms: Option<u64>,
        success: bool,
        details: impl Into<String>,
    ) {
        self.push(SyncLogEntry {
            kind,
            session_id: session_id.to_string(),
            timestamp,
            latency_ms,
            success,
            details: details.into(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &SyncLogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&SyncLogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut log = SyncEventLog::new(50);
        for i in 0..60u64 {
            log.record(
                SyncEventKind::Handshake,
                &format!("S{i}"),
                Timestamp::new(i),
                None,
                true,
                "",
            );
        }
        assert_eq!(log.len(), 50);
        assert_eq!(log.entries().next().unwrap().session_id, "S10");
        assert_eq!(log.last().unwrap().session_id, "S59");
    }
}
