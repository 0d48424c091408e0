//! In-flight begin timestamps awaiting their end event.
//!
//! Entries live in buckets of [`WAYS`] slots selected by key hash, and a key
//! only ever occupies a slot within its own bucket. Lookups scan the whole
//! bucket, so removing an entry needs no tombstone: the slot simply becomes
//! empty again.
//!
//! Two begins racing for the same absent key may claim different slots of the
//! bucket. After claiming, a writer rescans the bucket; the claim in the
//! lowest slot wins and the other backs out, so a key is present at most once.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::key::{PairContext, TableKey};
use super::slot::{self, is_claimed, is_occupied, KeyHash, Slot};
use super::staleness::StalenessGuard;
use super::{reserve, slot_count, unreserve, Upsert};

/// Slots per bucket.
pub const WAYS: usize = 8;

#[derive(Default)]
struct Pending {
    start_ns: AtomicU64,
    context: AtomicU64,
}

impl Pending {
    #[inline]
    fn store(&self, start_ns: u64, context: u64) {
        self.start_ns.store(start_ns, Ordering::Relaxed);
        self.context.store(context, Ordering::Relaxed);
    }
}

/// Result of matching an end event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome<C> {
    /// No begin recorded for the key.
    Unpaired,
    /// A begin was consumed but the duration exceeded the staleness ceiling.
    Stale { duration_ns: u64 },
    Paired {
        start_ns: u64,
        duration_ns: u64,
        context: C,
    },
}

/// Bounded map from key to a begin timestamp and a context word.
pub struct PairingTable<K, C> {
    name: &'static str,
    slots: Box<[Slot<Pending>]>,
    bits: u32,
    capacity: usize,
    len: AtomicUsize,
    guard: StalenessGuard,
    _marker: PhantomData<fn() -> (K, C)>,
}

impl<K: TableKey, C: PairContext> PairingTable<K, C> {
    pub fn new(name: &'static str, capacity: usize, guard: StalenessGuard) -> Self {
        let n = slot_count(capacity).max(WAYS);
        let buckets = n / WAYS;
        Self {
            name,
            slots: slot::allocate(n),
            bits: buckets.trailing_zeros(),
            capacity,
            len: AtomicUsize::new(0),
            guard,
            _marker: PhantomData,
        }
    }

    fn bucket(&self, hash: KeyHash) -> &[Slot<Pending>] {
        let start = hash.home(self.bits) * WAYS;
        self.slots.get(start..start + WAYS).unwrap_or_default()
    }

    /// Record that `key` began at `timestamp_ns`, replacing any earlier begin
    /// for the same key.
    pub fn begin(&self, key: K, timestamp_ns: u64, context: C) -> Upsert {
        let words = key.pack();
        let hash = KeyHash::of(words);
        let bucket = self.bucket(hash);
        let ctx = context.to_word();

        for slot in bucket {
            let tag = slot.tag();
            if !hash.matches(tag) {
                continue;
            }
            if is_claimed(tag) {
                // A begin for this key is being inserted concurrently.
                return Upsert::Dropped;
            }
            if slot.holds(tag, words) {
                slot.value.store(timestamp_ns, ctx);
                return Upsert::Applied;
            }
        }

        if !reserve(&self.len, self.capacity) {
            return Upsert::Dropped;
        }
        for (way, slot) in bucket.iter().enumerate() {
            if slot.try_claim(hash).is_err() {
                continue;
            }
            slot.write_key(words);
            slot.value.store(timestamp_ns, ctx);
            return self.settle_claim(bucket, way, hash, words, timestamp_ns, ctx);
        }

        unreserve(&self.len);
        Upsert::Dropped
    }

    /// Resolve a fresh claim at `way` against concurrent claims for the same
    /// key elsewhere in the bucket.
    fn settle_claim(
        &self,
        bucket: &[Slot<Pending>],
        way: usize,
        hash: KeyHash,
        words: [u64; 2],
        timestamp_ns: u64,
        ctx: u64,
    ) -> Upsert {
        let ours = bucket.get(way);
        for earlier in bucket.iter().take(way) {
            let tag = earlier.tag_ordered();
            if !hash.matches(tag) {
                continue;
            }
            if is_occupied(tag) && !earlier.holds(tag, words) {
                continue;
            }
            if let Some(ours) = ours {
                ours.vacate();
            }
            unreserve(&self.len);
            if is_claimed(tag) {
                return Upsert::Dropped;
            }
            earlier.value.store(timestamp_ns, ctx);
            return Upsert::Applied;
        }
        if let Some(ours) = ours {
            ours.publish(hash);
        }
        // A later claim that already published for this key lost to ours.
        for later in bucket.iter().skip(way + 1) {
            let tag = later.tag_ordered();
            if hash.matches(tag)
                && is_occupied(tag)
                && later.holds(tag, words)
                && later.release(tag)
            {
                unreserve(&self.len);
            }
        }
        Upsert::Applied
    }

    /// Consume the begin for `key` and compute its duration up to
    /// `timestamp_ns`. Each begin is consumed at most once.
    pub fn end(&self, key: K, timestamp_ns: u64) -> EndOutcome<C> {
        self.take(key, timestamp_ns, false)
    }

    /// Like [`end`](Self::end), but a begin stamped 0 is left pending and
    /// the end reported as unpaired.
    pub fn end_stamped(&self, key: K, timestamp_ns: u64) -> EndOutcome<C> {
        self.take(key, timestamp_ns, true)
    }

    fn take(&self, key: K, timestamp_ns: u64, skip_unstamped: bool) -> EndOutcome<C> {
        let words = key.pack();
        let hash = KeyHash::of(words);

        for slot in self.bucket(hash) {
            let tag = slot.tag();
            if !hash.matches(tag) || !is_occupied(tag) || !slot.holds(tag, words) {
                continue;
            }
            let start_ns = slot.value.start_ns.load(Ordering::Relaxed);
            if skip_unstamped && start_ns == 0 {
                return EndOutcome::Unpaired;
            }
            let context = slot.value.context.load(Ordering::Relaxed);
            if !slot.release(tag) {
                // Consumed or replaced concurrently.
                return EndOutcome::Unpaired;
            }
            unreserve(&self.len);

            let duration_ns = timestamp_ns.wrapping_sub(start_ns);
            if !self.guard.admits(duration_ns) {
                return EndOutcome::Stale { duration_ns };
            }
            return EndOutcome::Paired {
                start_ns,
                duration_ns,
                context: C::from_word(context),
            };
        }

        EndOutcome::Unpaired
    }

    /// Whether a begin is pending for `key`.
    pub fn contains(&self, key: K) -> bool {
        let words = key.pack();
        let hash = KeyHash::of(words);
        self.bucket(hash).iter().any(|slot| {
            let tag = slot.tag();
            hash.matches(tag) && is_occupied(tag) && slot.holds(tag, words)
        })
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn guard(&self) -> StalenessGuard {
        self.guard
    }
}

impl<K, C> std::fmt::Debug for PairingTable<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingTable")
            .field("name", &self.name)
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .field("ceiling", &self.guard.ceiling())
            .finish()
    }
}
