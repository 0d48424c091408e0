use std::time::Duration;

/// Upper bound on a believable begin-to-end duration.
///
/// Longer durations mean the begin event was orphaned (its end was never
/// observed) or the clock misbehaved, and the sample is discarded. Durations
/// exactly at the ceiling are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessGuard {
    ceiling_ns: u64,
}

impl StalenessGuard {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            ceiling_ns: u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    pub const fn from_nanos(ceiling_ns: u64) -> Self {
        Self { ceiling_ns }
    }

    #[inline]
    pub fn admits(&self, duration_ns: u64) -> bool {
        duration_ns <= self.ceiling_ns
    }

    /// Strict form of [`admits`](Self::admits): a duration at the ceiling
    /// is stale.
    #[inline]
    pub fn admits_below(&self, duration_ns: u64) -> bool {
        duration_ns < self.ceiling_ns
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_nanos(self.ceiling_ns)
    }
}
