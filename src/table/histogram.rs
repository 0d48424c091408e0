use std::sync::atomic::{AtomicU32, Ordering};

/// Number of histogram slots.
pub const NUM_SLOTS: usize = 16;

/// Returns the log2 slot for a latency in microseconds.
///
/// Slot `i` covers `[2^i, 2^(i+1))` microseconds. Values of 0 and 1 land in
/// slot 0 and everything at or above `2^15` lands in the last slot.
#[inline]
pub fn slot_index(value_us: u64) -> usize {
    if value_us <= 1 {
        return 0;
    }
    let log2 = (63 - value_us.leading_zeros()) as usize;
    log2.min(NUM_SLOTS - 1)
}

/// Log2 histogram of latencies in microseconds.
/// All operations are atomic and safe for concurrent use.
pub struct Histogram {
    slots: [AtomicU32; NUM_SLOTS],
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Records a latency given in nanoseconds.
    #[inline]
    pub fn record_ns(&self, value_ns: u64) {
        if let Some(slot) = self.slots.get(slot_index(value_ns / 1_000)) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> [u32; NUM_SLOTS] {
        let mut out = [0u32; NUM_SLOTS];
        for (dst, slot) in out.iter_mut().zip(self.slots.iter()) {
            *dst = slot.load(Ordering::Relaxed);
        }
        out
    }

    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("slots", &self.snapshot())
            .finish()
    }
}

/// Estimated latency percentiles in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Percentiles {
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

/// Midpoint of slot `i` in nanoseconds.
pub fn slot_midpoint_ns(i: usize) -> u64 {
    let lo = 1u64 << i;
    let hi = lo << 1;
    (lo + hi) / 2 * 1_000
}

/// Estimates p50/p95/p99 from slot counts. Each percentile is answered with
/// the midpoint of the first slot whose cumulative count reaches its target.
pub fn percentiles<S: Copy + Into<u64>>(slots: &[S], total: u64) -> Percentiles {
    if total == 0 {
        return Percentiles::default();
    }

    let targets = [(total + 1) / 2, total * 95 / 100 + 1, total * 99 / 100 + 1];
    let mut results = [0u64; 3];
    let mut found = 0;
    let mut cumulative = 0u64;

    for (i, &count) in slots.iter().enumerate() {
        cumulative += count.into();
        while let Some(&target) = targets.get(found) {
            if cumulative < target {
                break;
            }
            if let Some(result) = results.get_mut(found) {
                *result = slot_midpoint_ns(i);
            }
            found += 1;
        }
        if found >= targets.len() {
            break;
        }
    }

    Percentiles {
        p50_ns: results[0],
        p95_ns: results[1],
        p99_ns: results[2],
    }
}
