//! Flush scheduling: deciding when buffered samples hit the disk.
//!
//! Three modes, selected in configuration:
//!
//! - `immediate`: every accepted sample is written before the next one is
//!   accepted;
//! - `threshold`: a flush is requested once the pending count reaches the
//!   configured threshold;
//! - `interval`: the writer task flushes on a timer, bounding data-at-risk
//!   to one interval of samples.
//!
//! The scheduler also enforces the single-in-flight rule: a trigger that
//! fires while a flush is running is coalesced into exactly one follow-up
//! flush, never queued and never lost. The in-flight slot and the pending
//! trigger live in one atomic word; recording a trigger and completing a
//! flush are both single compare-and-swap transitions, so neither side can
//! miss the other.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Default pending-sample count that triggers a flush in `threshold` mode.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// When buffered samples are committed to storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Synchronous write per sample.
    Immediate,
    /// Flush when the pending count reaches the threshold.
    #[default]
    Threshold,
    /// Flush on a fixed timer.
    Interval,
}

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;
const IN_FLIGHT_PENDING: u8 = 2;

/// Decides when a flush is due and coalesces concurrent triggers.
pub struct FlushScheduler {
    mode: FlushMode,
    threshold: usize,
    state: AtomicU8,
}

impl FlushScheduler {
    pub fn new(mode: FlushMode, threshold: usize) -> Self {
        Self {
            mode,
            threshold: threshold.max(1),
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    /// Called once per enqueued sample with the current pending count.
    /// Returns whether a flush should be requested now.
    pub fn on_sample_accepted(&self, pending: usize) -> bool {
        match self.mode {
            FlushMode::Immediate => true,
            FlushMode::Threshold => pending >= self.threshold,
            FlushMode::Interval => false,
        }
    }

    /// Claim the in-flight slot. Returns `true` if the caller should run a
    /// flush now; otherwise the trigger is recorded and collapses into one
    /// follow-up flush when the running one finishes. Recording happens in
    /// the same transition that observes the slot as busy, so a `false`
    /// return guarantees a later [`finish`](Self::finish) sees the trigger.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            let (next, claimed) = match state {
                IDLE => (IN_FLIGHT, true),
                IN_FLIGHT => (IN_FLIGHT_PENDING, false),
                // Already coalesced with an earlier trigger.
                _ => return false,
            };
            match self
                .state
                .compare_exchange_weak(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return claimed,
                Err(actual) => state = actual,
            }
        }
    }

    /// Mark the running flush complete. Returns `true` if a coalesced
    /// trigger arrived meanwhile; the caller must then run exactly one
    /// follow-up flush and call `finish` again. The slot stays claimed
    /// across the follow-up so no second writer can start.
    pub fn finish(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            let (next, followup) = match state {
                IN_FLIGHT_PENDING => (IN_FLIGHT, true),
                _ => (IDLE, false),
            };
            match self
                .state
                .compare_exchange_weak(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return followup,
                Err(actual) => state = actual,
            }
        }
    }
}
