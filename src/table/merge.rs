//! Per-field merge policies applied when a sample lands on an existing record.
//!
//! Counters and totals add with wraparound. Maximum and minimum fields follow
//! the configured [`MergeMode`]. Descriptive fields are overwritten, last
//! writer wins.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Deserialize;

/// How maximum and minimum fields are updated under contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Load, compare, store. Concurrent updates may lose a larger value.
    Relaxed,
    /// Compare-and-swap retry loop. The extreme is never lost.
    Strict,
}

impl Default for MergeMode {
    fn default() -> Self {
        Self::Relaxed
    }
}

impl MergeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relaxed => "relaxed",
            Self::Strict => "strict",
        }
    }
}

#[inline]
pub fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn increment_u32(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Add to a running total. Atomic adds wrap on overflow.
#[inline]
pub fn accumulate(total: &AtomicU64, value: u64) {
    total.fetch_add(value, Ordering::Relaxed);
}

/// Narrow a 64-bit value into a 32-bit field, saturating.
#[inline]
pub fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[inline]
pub fn track_max_u32(slot: &AtomicU32, value: u32, mode: MergeMode) {
    match mode {
        MergeMode::Relaxed => {
            if value > slot.load(Ordering::Relaxed) {
                slot.store(value, Ordering::Relaxed);
            }
        }
        MergeMode::Strict => {
            slot.fetch_max(value, Ordering::Relaxed);
        }
    }
}

#[inline]
pub fn track_max_u64(slot: &AtomicU64, value: u64, mode: MergeMode) {
    match mode {
        MergeMode::Relaxed => {
            if value > slot.load(Ordering::Relaxed) {
                slot.store(value, Ordering::Relaxed);
            }
        }
        MergeMode::Strict => {
            slot.fetch_max(value, Ordering::Relaxed);
        }
    }
}

/// Track a minimum where zero means "not set yet".
#[inline]
pub fn track_min_nonzero_u32(slot: &AtomicU32, value: u32, mode: MergeMode) {
    if value == 0 {
        return;
    }
    match mode {
        MergeMode::Relaxed => {
            let current = slot.load(Ordering::Relaxed);
            if current == 0 || value < current {
                slot.store(value, Ordering::Relaxed);
            }
        }
        MergeMode::Strict => loop {
            let current = slot.load(Ordering::Relaxed);
            if current != 0 && value >= current {
                break;
            }
            if slot
                .compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        },
    }
}
