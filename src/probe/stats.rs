use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{EventKind, MAX_EVENT_KIND};
use super::Outcome;

const OUTCOMES: usize = 6;

/// Lock-free per-EventKind and per-Outcome counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
pub struct EventStats {
    received: [AtomicU64; MAX_EVENT_KIND + 1],
    outcomes: [AtomicU64; OUTCOMES],
    malformed: AtomicU64,
}

/// Counters accumulated since the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Non-zero per-kind receive counts.
    pub received: Vec<(EventKind, u64)>,
    /// Non-zero handler outcome counts.
    pub outcomes: Vec<(Outcome, u64)>,
    pub malformed: u64,
}

impl EventStats {
    /// Create a new zeroed EventStats.
    pub fn new() -> Self {
        Self {
            received: std::array::from_fn(|_| AtomicU64::new(0)),
            outcomes: std::array::from_fn(|_| AtomicU64::new(0)),
            malformed: AtomicU64::new(0),
        }
    }

    /// Count one received event of the given kind.
    pub fn record(&self, kind: EventKind) {
        if let Some(counter) = self.received.get(kind as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one handler outcome.
    pub fn record_outcome(&self, outcome: Outcome) {
        if let Some(counter) = self.outcomes.get(outcome as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one record that failed to decode.
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters, returning only non-zero entries.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snap = StatsSnapshot::default();

        for (i, counter) in self.received.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(kind) = EventKind::from_u8(i as u8) {
                    snap.received.push((kind, v));
                }
            }
        }

        for (outcome, counter) in Outcome::all().iter().zip(self.outcomes.iter()) {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                snap.outcomes.push((*outcome, v));
            }
        }

        snap.malformed = self.malformed.swap(0, Ordering::Relaxed);
        snap
    }
}

impl Default for EventStats {
    fn default() -> Self {
        Self::new()
    }
}
