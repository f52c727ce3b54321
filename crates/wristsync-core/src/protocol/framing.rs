//! Framing: MTU chunking on send, line reassembly on receive
//!
//! Frames carry no header; a logical unit is everything up to the next `\n`.
//! Senders split frames into raw contiguous chunks no larger than the link's
//! maximum payload and receivers buffer until a terminator is seen.

use smallvec::SmallVec;
use tracing::warn;

use crate::protocol::constants::LINE_TERMINATOR;

/// Default cap on buffered bytes without a terminator
pub const DEFAULT_MAX_PENDING_BYTES: usize = 16 * 1024;

/// Split `data` into in-order chunks of at most `max_payload` bytes
pub fn chunk_payload(data: &[u8], max_payload: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(max_payload.max(1))
}

// ----------------------------------------------------------------------------
// Line Assembler
// ----------------------------------------------------------------------------

/// Reassembles chunked notifications into trimmed, non-empty lines
#[derive(Debug, Clone)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    max_pending: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_BYTES)
    }
}

impl LineAssembler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_pending,
        }
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> SmallVec<[String; 4]> {
        let mut lines = SmallVec::new();
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|b| *b == LINE_TERMINATOR) {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        if self.buffer.len() > self.max_pending {
            warn!(
                "Dropping {} buffered bytes without line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        lines
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn oversized_row_splits_into_ceil_chunks() {
        let row = vec![b'x'; 220];
        let chunks: Vec<&[u8]> = chunk_payload(&row, 180).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 180);
        assert_eq!(chunks[1].len(), 40);
        assert_eq!(chunks.concat(), row);
    }

    #[test]
    fn small_row_is_a_single_chunk() {
        let row = b"12:00:00,72.0,null,null,null,0.000,0.000,0.000\n";
        assert_eq!(chunk_payload(row, 180).count(), 1);
    }

    #[test]
    fn assembler_joins_chunks_and_trims() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.push(b"Timestamp,Heart").is_empty());
        let lines = assembler.push(b"Rate\r\n\n12:00:00,7");
        assert_eq!(lines.as_slice(), ["Timestamp,HeartRate".to_string()]);
        assert_eq!(assembler.pending(), 10);
        let lines = assembler.push(b"2\n");
        assert_eq!(lines.as_slice(), ["12:00:00,72".to_string()]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn assembler_bounds_unterminated_input() {
        let mut assembler = LineAssembler::new(8);
        assembler.push(b"0123456789");
        assert_eq!(assembler.pending(), 0);
    }

    proptest! {
        #[test]
        fn chunks_reassemble_byte_for_byte(
            data in proptest::collection::vec(any::<u8>(), 0..1024),
            mtu in 1usize..300,
        ) {
            let chunks: Vec<&[u8]> = chunk_payload(&data, mtu).collect();
            prop_assert!(chunks.iter().all(|c| c.len() <= mtu));
            prop_assert_eq!(chunks.len(), data.len().div_ceil(mtu));
            prop_assert_eq!(chunks.concat(), data);
        }

        #[test]
        fn assembler_recovers_lines_for_any_chunking(
            lines in proptest::collection::vec("[a-z0-9,:.]{1,60}", 1..8),
            mtu in 1usize..64,
        ) {
            let stream: String = lines.iter().map(|l| format!("{l}\n")).collect();
            let mut assembler = LineAssembler::default();
            let mut out = Vec::new();
            for chunk in chunk_payload(stream.as_bytes(), mtu) {
                out.extend(assembler.push(chunk));
            }
            prop_assert_eq!(out, lines);
        }
    }
}
