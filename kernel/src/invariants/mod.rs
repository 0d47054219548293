// Ordering Invariants
//
// Rules that must hold for every append against a log target.
// `admit` runs before a record is sent, `commit` once the log has
// acknowledged it. Violations stop the record, never the pipeline.

use crate::log::Cursor;
use crate::record::{LineRecord, Sequence};

/// Appender position between two appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Last record handed to the log, if any.
    pub sequence: Option<Sequence>,
    pub cursor: Cursor,
}

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checked before `record` is sent.
    fn admit(&self, _previous: &Checkpoint, _record: &LineRecord) -> InvariantResult {
        InvariantResult::Pass
    }

    /// Checked after the log acknowledged `record` at `next`.
    fn commit(
        &self,
        _previous: &Checkpoint,
        _record: &LineRecord,
        _next: &Checkpoint,
    ) -> InvariantResult {
        InvariantResult::Pass
    }
}

/// Records go out in the order they were framed.
pub struct StrictlyIncreasingSequence;

impl Invariant for StrictlyIncreasingSequence {
    fn name(&self) -> &'static str {
        "strictly-increasing-sequence"
    }

    fn admit(&self, previous: &Checkpoint, record: &LineRecord) -> InvariantResult {
        match previous.sequence {
            Some(last) if record.sequence() <= last => InvariantResult::Fail(format!(
                "record {} follows record {}",
                record.sequence(),
                last
            )),
            _ => InvariantResult::Pass,
        }
    }
}

/// Every acknowledged append moves the cursor forward.
pub struct AdvancingCursor;

impl Invariant for AdvancingCursor {
    fn name(&self) -> &'static str {
        "advancing-cursor"
    }

    fn commit(
        &self,
        previous: &Checkpoint,
        _record: &LineRecord,
        next: &Checkpoint,
    ) -> InvariantResult {
        if next.cursor > previous.cursor {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!(
                "cursor moved from {} to {}",
                previous.cursor, next.cursor
            ))
        }
    }
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl std::fmt::Debug for InvariantEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.invariants.iter().map(|i| i.name()))
            .finish()
    }
}

impl InvariantEngine {
    /// Create an empty invariant engine.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine with the ordering rules every appender enforces.
    pub fn ordering() -> Self {
        let mut engine = Self::new();
        engine.register(StrictlyIncreasingSequence);
        engine.register(AdvancingCursor);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all pre-send checks. Stops at the first failure.
    pub fn admit(
        &self,
        previous: &Checkpoint,
        record: &LineRecord,
    ) -> Result<(), InvariantViolation> {
        self.first_failure(|invariant| invariant.admit(previous, record))
    }

    /// Evaluate all post-acknowledgement checks. Stops at the first failure.
    pub fn commit(
        &self,
        previous: &Checkpoint,
        record: &LineRecord,
        next: &Checkpoint,
    ) -> Result<(), InvariantViolation> {
        self.first_failure(|invariant| invariant.commit(previous, record, next))
    }

    fn first_failure<F>(&self, check: F) -> Result<(), InvariantViolation>
    where
        F: Fn(&dyn Invariant) -> InvariantResult,
    {
        for invariant in &self.invariants {
            match check(invariant.as_ref()) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, thiserror::Error)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}
