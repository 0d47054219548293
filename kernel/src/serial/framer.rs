// Line Framing
//
// Splits an arbitrarily chunked byte stream into records at each
// newline. Output depends only on the bytes, never on how they
// were chunked.

use std::collections::VecDeque;

use tracing::warn;

use super::LINE_DELIMITER;
use crate::record::{LineRecord, Sequence};

/// Default cap on the bytes of a single unterminated line.
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// Incremental newline framer.
///
/// Every newline ends a record; there is no escape sequence. A line
/// longer than the buffer limit is dropped whole, up to and including
/// its delimiter.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    ready: VecDeque<LineRecord>,
    limit: usize,
    next_sequence: Sequence,
    discarding: bool,
    overflowed: u64,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LIMIT)
    }
}

impl LineFramer {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            ready: VecDeque::new(),
            limit,
            next_sequence: 1,
            discarding: false,
            overflowed: 0,
        }
    }

    /// Feed a chunk of raw input.
    pub fn push(&mut self, mut chunk: &[u8]) {
        while let Some(idx) = chunk.iter().position(|&b| b == LINE_DELIMITER) {
            self.extend(&chunk[..idx]);
            self.complete_line();
            chunk = &chunk[idx + 1..];
        }
        self.extend(chunk);
    }

    /// Take the oldest complete record, if any.
    pub fn next_record(&mut self) -> Option<LineRecord> {
        self.ready.pop_front()
    }

    /// Bytes buffered for a line that has not been terminated yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the unterminated tail. Returns how many bytes were dropped.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.discarding = false;
        dropped
    }

    /// Number of lines dropped for exceeding the buffer limit.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Number of records framed so far.
    pub fn framed(&self) -> u64 {
        self.next_sequence - 1
    }

    fn extend(&mut self, bytes: &[u8]) {
        if self.discarding || bytes.is_empty() {
            return;
        }
        if self.buffer.len() + bytes.len() > self.limit {
            warn!(
                limit = self.limit,
                buffered = self.buffer.len() + bytes.len(),
                "line exceeds buffer limit, dropping it"
            );
            self.buffer.clear();
            self.discarding = true;
            self.overflowed += 1;
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    fn complete_line(&mut self) {
        if self.discarding {
            self.discarding = false;
            return;
        }
        let payload = std::mem::take(&mut self.buffer);
        self.ready
            .push_back(LineRecord::new(self.next_sequence, payload));
        self.next_sequence += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &[u8] = b"355\t357\t464\n358\t354\t462\n";

    fn drain(framer: &mut LineFramer) -> Vec<LineRecord> {
        std::iter::from_fn(|| framer.next_record()).collect()
    }

    fn frame_whole(input: &[u8]) -> Vec<Vec<u8>> {
        let mut framer = LineFramer::default();
        framer.push(input);
        drain(&mut framer)
            .into_iter()
            .map(LineRecord::into_payload)
            .collect()
    }

    #[test]
    fn scenario_split_at_every_point() {
        for split in 0..=SCENARIO.len() {
            let mut framer = LineFramer::default();
            framer.push(&SCENARIO[..split]);
            framer.push(&SCENARIO[split..]);

            let records = drain(&mut framer);
            assert_eq!(records.len(), 2, "split at {split}");
            assert_eq!(records[0].payload(), b"355\t357\t464");
            assert_eq!(records[0].sequence(), 1);
            assert_eq!(records[1].payload(), b"358\t354\t462");
            assert_eq!(records[1].sequence(), 2);
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_stream() {
        let input = b"a\n\nbc\r\nlast-without-newline";
        let mut framer = LineFramer::default();
        for byte in input {
            framer.push(std::slice::from_ref(byte));
        }
        let chunked: Vec<Vec<u8>> = drain(&mut framer)
            .into_iter()
            .map(LineRecord::into_payload)
            .collect();

        let expected: Vec<Vec<u8>> = vec![b"a".to_vec(), b"".to_vec(), b"bc\r".to_vec()];
        assert_eq!(chunked, expected);
        assert_eq!(frame_whole(input), expected);
        assert_eq!(framer.pending(), b"last-without-newline".len());
    }

    #[test]
    fn trailing_fragment_is_not_a_record() {
        let mut framer = LineFramer::default();
        framer.push(b"1\t2\t3\n4\t5");
        assert_eq!(drain(&mut framer).len(), 1);
        assert_eq!(framer.discard_pending(), 3);
        assert_eq!(framer.pending(), 0);
        assert!(framer.next_record().is_none());
    }

    #[test]
    fn oversized_line_is_dropped_whole() {
        let mut framer = LineFramer::new(4);
        framer.push(b"ok\ntoo");
        framer.push(b"-long");
        framer.push(b"-still\nnext\n");

        let records = drain(&mut framer);
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.payload()).collect();
        assert_eq!(payloads, vec![&b"ok"[..], &b"next"[..]]);
        assert_eq!(records[1].sequence(), 2);
        assert_eq!(framer.overflowed(), 1);
    }

    #[test]
    fn sequences_are_strictly_increasing() {
        let mut framer = LineFramer::default();
        framer.push(b"a\nb\n");
        framer.push(b"c\n");
        let sequences: Vec<_> = drain(&mut framer).iter().map(|r| r.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(framer.framed(), 3);
    }
}
