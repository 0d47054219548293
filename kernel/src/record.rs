// Line Records
//
// A line record is one delimiter-terminated chunk of serial input.
// Records are immutable once framed.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Arrival order of a record, assigned by the reader. Starts at 1.
pub type Sequence = u64;

/// A single framed line, without its delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    sequence: Sequence,
    payload: Vec<u8>,
}

impl LineRecord {
    pub fn new(sequence: Sequence, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text. Invalid UTF-8 is replaced, not rejected.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
