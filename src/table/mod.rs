//! Fixed-capacity concurrent tables.
//!
//! [`AccumTable`] maps a key to an aggregate record and never grows: once
//! `capacity` distinct keys are present, samples for new keys are dropped
//! while existing keys keep merging. [`PairingTable`] holds in-flight begin
//! timestamps awaiting their end event.
//!
//! Both tables are preallocated, never allocate on the event path and never
//! block: every operation finishes in a bounded number of steps.

pub mod histogram;
pub mod key;
pub mod merge;
pub mod pairing;
pub mod record;
mod slot;
pub mod staleness;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use self::key::TableKey;
pub use self::merge::MergeMode;
pub use self::pairing::{EndOutcome, PairingTable};
pub use self::record::{Merge, Record};
pub use self::staleness::StalenessGuard;

use self::slot::{is_claimed, is_occupied, KeyHash, Slot, EMPTY, TOMBSTONE};

/// Attempts to claim a free slot before giving up on a new key.
const CLAIM_ATTEMPTS: usize = 4;

/// Result of applying a sample or begin event to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Applied,
    /// Table full for a new key, or lost an insert race for the same key.
    Dropped,
}

/// Number of slots backing a table of `capacity` entries: at least half as
/// many again, rounded up to a power of two.
fn slot_count(capacity: usize) -> usize {
    capacity
        .saturating_add(capacity / 2)
        .max(8)
        .next_power_of_two()
}

/// Reserve one entry against `capacity`.
fn reserve(len: &AtomicUsize, capacity: usize) -> bool {
    len.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        (n < capacity).then_some(n + 1)
    })
    .is_ok()
}

fn unreserve(len: &AtomicUsize) {
    len.fetch_sub(1, Ordering::AcqRel);
}

/// Outcome of walking a key's slot path.
enum Walk<'a, R> {
    Found(&'a Slot<R>),
    InFlight,
    /// Key absent; first free position and the tag it was seen with.
    Free { step: usize, tag: u64 },
    Exhausted,
}

/// Bounded key to record map with lock-free upsert.
///
/// Slots use linear probing. A new key claims the first free slot on its
/// slot path and is inserted at most once: a second writer for the same key
/// either merges into the published entry or, if it meets the first insert
/// still in flight, drops its sample. Removal leaves a tombstone that lookups
/// pass over and inserts reuse.
pub struct AccumTable<K, R> {
    name: &'static str,
    slots: Box<[Slot<R>]>,
    bits: u32,
    mask: usize,
    capacity: usize,
    len: AtomicUsize,
    mode: MergeMode,
    _key: PhantomData<fn() -> K>,
}

impl<K: TableKey, R: Record> AccumTable<K, R> {
    /// Preallocate a table holding at most `capacity` distinct keys.
    pub fn new(name: &'static str, capacity: usize, mode: MergeMode) -> Self {
        let n = slot_count(capacity);
        Self {
            name,
            slots: slot::allocate(n),
            bits: n.trailing_zeros(),
            mask: n - 1,
            capacity,
            len: AtomicUsize::new(0),
            mode,
            _key: PhantomData,
        }
    }

    /// Merge `sample` into the record for `key`, creating the record from the
    /// sample if the key is new.
    pub fn upsert<S: Copy>(&self, key: K, sample: S) -> Upsert
    where
        R: Merge<S>,
    {
        let words = key.pack();
        let hash = KeyHash::of(words);
        let home = hash.home(self.bits);

        for _ in 0..CLAIM_ATTEMPTS {
            let (step, free) = match self.walk(home, hash, words) {
                Walk::Found(slot) => {
                    slot.value.merge(sample, self.mode);
                    return Upsert::Applied;
                }
                // Same key being inserted or reset concurrently.
                Walk::InFlight => return Upsert::Dropped,
                Walk::Exhausted => return Upsert::Dropped,
                Walk::Free { step, tag } => (step, tag),
            };

            if !reserve(&self.len, self.capacity) {
                return Upsert::Dropped;
            }
            let Some(slot) = self.slot_at(home, step) else {
                unreserve(&self.len);
                return Upsert::Dropped;
            };
            if slot.try_claim_from(free, hash).is_err() {
                // Taken since the walk; look again.
                unreserve(&self.len);
                continue;
            }

            slot.write_key(words);
            slot.value.reset();
            slot.value.merge(sample, self.mode);
            return self.settle_claim(home, step, hash, words, sample);
        }

        Upsert::Dropped
    }

    fn slot_at(&self, home: usize, step: usize) -> Option<&Slot<R>> {
        self.slots.get((home + step) & self.mask)
    }

    /// Walk the slot path of a key up to the first empty slot. Tombstones
    /// are passed over, the first free position is remembered.
    fn walk(&self, home: usize, hash: KeyHash, words: [u64; 2]) -> Walk<'_, R> {
        let mut free = None;
        for step in 0..self.slots.len() {
            let Some(slot) = self.slot_at(home, step) else {
                break;
            };
            let tag = slot.tag();
            if tag == EMPTY {
                let (step, tag) = free.unwrap_or((step, EMPTY));
                return Walk::Free { step, tag };
            }
            if tag == TOMBSTONE {
                if free.is_none() {
                    free = Some((step, TOMBSTONE));
                }
                continue;
            }
            if hash.matches(tag) {
                if is_claimed(tag) {
                    return Walk::InFlight;
                }
                if slot.holds(tag, words) {
                    return Walk::Found(slot);
                }
            }
        }
        match free {
            Some((step, tag)) => Walk::Free { step, tag },
            None => Walk::Exhausted,
        }
    }

    /// Resolve a fresh claim at `step` against claims for the same key made
    /// concurrently elsewhere on the slot path. The claim nearest to home
    /// wins.
    fn settle_claim<S: Copy>(
        &self,
        home: usize,
        step: usize,
        hash: KeyHash,
        words: [u64; 2],
        sample: S,
    ) -> Upsert
    where
        R: Merge<S>,
    {
        let ours = self.slot_at(home, step);
        for earlier_step in 0..step {
            let Some(earlier) = self.slot_at(home, earlier_step) else {
                continue;
            };
            let tag = earlier.tag_ordered();
            if !hash.matches(tag) {
                continue;
            }
            if is_occupied(tag) && !earlier.holds(tag, words) {
                continue;
            }
            if let Some(ours) = ours {
                ours.bury();
            }
            unreserve(&self.len);
            if is_claimed(tag) {
                return Upsert::Dropped;
            }
            earlier.value.merge(sample, self.mode);
            return Upsert::Applied;
        }

        if let Some(ours) = ours {
            ours.publish(hash);
        }

        // A copy further along that already published lost to ours.
        for later_step in step + 1..self.slots.len() {
            let Some(later) = self.slot_at(home, later_step) else {
                break;
            };
            let tag = later.tag_ordered();
            if tag == EMPTY {
                break;
            }
            if hash.matches(tag)
                && is_occupied(tag)
                && later.holds(tag, words)
                && later.seize(tag)
            {
                later.value.reset();
                later.bury();
                unreserve(&self.len);
            }
        }
        Upsert::Applied
    }

    /// Current record for `key`, if present.
    pub fn get(&self, key: K) -> Option<R::Snapshot> {
        let words = key.pack();
        let hash = KeyHash::of(words);
        let mut idx = hash.home(self.bits);

        for _ in 0..self.slots.len() {
            let slot = self.slots.get(idx)?;
            let tag = slot.tag();
            if tag == EMPTY {
                return None;
            }
            if hash.matches(tag) && is_occupied(tag) && slot.holds(tag, words) {
                return Some(slot.value.snapshot());
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Point-in-time copy of every published entry.
    pub fn snapshot(&self) -> Vec<(K, R::Snapshot)> {
        let mut out = Vec::with_capacity(self.len());
        for slot in self.slots.iter() {
            let tag = slot.tag();
            if !is_occupied(tag) {
                continue;
            }
            let value = slot.value.snapshot();
            if let Some(words) = slot.stable_key(tag) {
                out.push((K::unpack(words), value));
            }
        }
        out
    }

    /// Snapshot every entry and remove it. Entries inserted while the drain
    /// runs may survive it.
    pub fn drain(&self) -> Vec<(K, R::Snapshot)> {
        let mut out = Vec::with_capacity(self.len());
        self.evict_all(|key, value| out.push((key, value)));
        out
    }

    /// Remove every entry without reading it.
    pub fn clear(&self) {
        self.evict_all(|_, _| {});
    }

    /// Removed entries leave tombstones, so an entry whose insert is still
    /// in flight stays reachable past them.
    fn evict_all(&self, mut visit: impl FnMut(K, R::Snapshot)) {
        for slot in self.slots.iter() {
            let tag = slot.tag();
            if !is_occupied(tag) || !slot.seize(tag) {
                continue;
            }
            visit(K::unpack(slot.read_key()), slot.value.snapshot());
            slot.value.reset();
            slot.bury();
            unreserve(&self.len);
        }
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

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    #[cfg(test)]
    fn slot_for(&self, key: K) -> &Slot<R> {
        let hash = KeyHash::of(key.pack());
        &self.slots[hash.home(self.bits)]
    }
}

impl<K, R> std::fmt::Debug for AccumTable<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumTable")
            .field("name", &self.name)
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .field("slots", &self.slots.len())
            .field("mode", &self.mode)
            .finish()
    }
}
