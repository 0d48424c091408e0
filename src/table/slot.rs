//! Slot storage shared by the accumulation and pairing tables.
//!
//! Every slot carries a tag word. Zero means empty. Any other value holds the
//! key fingerprint in the upper bits and the slot state in the low two bits:
//! `CLAIMED` while a writer owns the slot exclusively, `OCCUPIED` once the key
//! is published and the value may be merged into by anyone. A removed entry
//! leaves a `TOMBSTONE`, which keeps later entries on the same slot path
//! reachable and is reused by the next insert.

use std::hash::Hasher;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use rustc_hash::FxHasher;

pub(crate) const EMPTY: u64 = 0;

const STATE_MASK: u64 = 0b11;
const CLAIMED: u64 = 0b01;
const OCCUPIED: u64 = 0b10;

/// Removed entry. Carries no fingerprint, so it never matches a key.
pub(crate) const TOMBSTONE: u64 = STATE_MASK;

/// Hash of a packed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeyHash(u64);

impl KeyHash {
    pub(crate) fn of(words: [u64; 2]) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write_u64(words[0]);
        hasher.write_u64(words[1]);
        // Fingerprint bits never collapse to the empty tag.
        Self(hasher.finish() | (1 << 63))
    }

    /// Home position among `1 << bits` positions, taken from the high bits.
    pub(crate) fn home(self, bits: u32) -> usize {
        if bits == 0 {
            0
        } else {
            (self.0.rotate_left(17) >> (64 - bits)) as usize
        }
    }

    fn fingerprint(self) -> u64 {
        self.0 & !STATE_MASK
    }

    pub(crate) fn claimed(self) -> u64 {
        self.fingerprint() | CLAIMED
    }

    pub(crate) fn occupied(self) -> u64 {
        self.fingerprint() | OCCUPIED
    }

    /// Whether `tag` belongs to a key with this fingerprint.
    pub(crate) fn matches(self, tag: u64) -> bool {
        tag != EMPTY && tag & !STATE_MASK == self.fingerprint()
    }
}

pub(crate) fn is_claimed(tag: u64) -> bool {
    tag & STATE_MASK == CLAIMED
}

pub(crate) fn is_occupied(tag: u64) -> bool {
    tag & STATE_MASK == OCCUPIED
}

/// One table position: tag, packed key and the stored value.
pub(crate) struct Slot<V> {
    tag: AtomicU64,
    key: [AtomicU64; 2],
    pub(crate) value: V,
}

impl<V: Default> Default for Slot<V> {
    fn default() -> Self {
        Self {
            tag: AtomicU64::new(EMPTY),
            key: [AtomicU64::new(0), AtomicU64::new(0)],
            value: V::default(),
        }
    }
}

impl<V> Slot<V> {
    #[inline]
    pub(crate) fn tag(&self) -> u64 {
        self.tag.load(Ordering::Acquire)
    }

    /// Tag load that takes part in the single total order of claims.
    #[inline]
    pub(crate) fn tag_ordered(&self) -> u64 {
        self.tag.load(Ordering::SeqCst)
    }

    /// Take exclusive ownership of an empty slot. On failure returns the tag
    /// that was observed instead.
    #[inline]
    pub(crate) fn try_claim(&self, hash: KeyHash) -> Result<(), u64> {
        self.try_claim_from(EMPTY, hash)
    }

    /// Take exclusive ownership of a free slot last seen as `free`, either
    /// empty or a tombstone.
    #[inline]
    pub(crate) fn try_claim_from(&self, free: u64, hash: KeyHash) -> Result<(), u64> {
        self.tag
            .compare_exchange(free, hash.claimed(), Ordering::SeqCst, Ordering::Acquire)
            .map(|_| fence(Ordering::Release))
    }

    /// Take exclusive ownership of a published slot, as observed in `tag`.
    #[inline]
    pub(crate) fn seize(&self, tag: u64) -> bool {
        let claimed = (tag & !STATE_MASK) | CLAIMED;
        let seized = self
            .tag
            .compare_exchange(tag, claimed, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if seized {
            fence(Ordering::Release);
        }
        seized
    }

    /// Atomically turn a published slot, as observed in `tag`, back to empty.
    #[inline]
    pub(crate) fn release(&self, tag: u64) -> bool {
        self.tag
            .compare_exchange(tag, EMPTY, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn write_key(&self, words: [u64; 2]) {
        self.key[0].store(words[0], Ordering::Relaxed);
        self.key[1].store(words[1], Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn read_key(&self) -> [u64; 2] {
        [
            self.key[0].load(Ordering::Relaxed),
            self.key[1].load(Ordering::Relaxed),
        ]
    }

    /// Publish a claimed slot.
    #[inline]
    pub(crate) fn publish(&self, hash: KeyHash) {
        self.tag.store(hash.occupied(), Ordering::Release);
    }

    /// Return an owned slot to empty.
    #[inline]
    pub(crate) fn vacate(&self) {
        self.tag.store(EMPTY, Ordering::Release);
    }

    /// Remove the entry of an owned slot from its slot path.
    #[inline]
    pub(crate) fn bury(&self) {
        self.tag.store(TOMBSTONE, Ordering::Release);
    }

    /// Whether the slot, observed published as `tag`, holds `words`.
    ///
    /// The tag is read again after the key so that a key rewritten by a
    /// concurrent reclaim is never mistaken for a match.
    #[inline]
    pub(crate) fn holds(&self, tag: u64, words: [u64; 2]) -> bool {
        let key = self.read_key();
        fence(Ordering::Acquire);
        key == words && self.tag.load(Ordering::Relaxed) == tag
    }

    /// Read the key of a slot observed published as `tag`, or `None` if the
    /// slot changed while it was being read.
    #[inline]
    pub(crate) fn stable_key(&self, tag: u64) -> Option<[u64; 2]> {
        let key = self.read_key();
        fence(Ordering::Acquire);
        (self.tag.load(Ordering::Relaxed) == tag).then_some(key)
    }
}

/// Allocate `n` default slots.
pub(crate) fn allocate<V: Default>(n: usize) -> Box<[Slot<V>]> {
    (0..n).map(|_| Slot::default()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_never_produces_empty_tag() {
        for pid in 0..1000u64 {
            let hash = KeyHash::of([pid, 0]);
            assert_ne!(hash.claimed(), EMPTY);
            assert_ne!(hash.occupied(), EMPTY);
            assert!(hash.matches(hash.claimed()));
            assert!(hash.matches(hash.occupied()));
            assert!(!hash.matches(EMPTY));
        }
    }

    #[test]
    fn test_home_stays_in_range() {
        for bits in [0u32, 1, 3, 10, 20] {
            for pid in 0..500u64 {
                let home = KeyHash::of([pid, 0]).home(bits);
                assert!(home < (1usize << bits));
            }
        }
    }

    #[test]
    fn test_home_spreads_sequential_keys() {
        let bits = 6;
        let mut seen = [false; 64];
        for pid in 0..256u64 {
            if let Some(hit) = seen.get_mut(KeyHash::of([pid, 0]).home(bits)) {
                *hit = true;
            }
        }
        let used = seen.iter().filter(|s| **s).count();
        assert!(used > 40, "only {used} of 64 positions used");
    }

    #[test]
    fn test_claim_publish_release() {
        let slot: Slot<()> = Slot::default();
        let hash = KeyHash::of([7, 0]);

        assert!(slot.try_claim(hash).is_ok());
        assert!(is_claimed(slot.tag()));
        assert_eq!(slot.try_claim(hash), Err(hash.claimed()));

        slot.write_key([7, 0]);
        slot.publish(hash);
        let tag = slot.tag();
        assert!(is_occupied(tag));
        assert!(slot.holds(tag, [7, 0]));
        assert!(!slot.holds(tag, [8, 0]));
        assert_eq!(slot.stable_key(tag), Some([7, 0]));

        assert!(slot.release(tag));
        assert_eq!(slot.tag(), EMPTY);
        assert!(!slot.release(tag));
    }

    #[test]
    fn test_seize_requires_observed_tag() {
        let slot: Slot<()> = Slot::default();
        let hash = KeyHash::of([1, 2]);
        assert!(slot.try_claim(hash).is_ok());
        slot.publish(hash);

        assert!(!slot.seize(hash.claimed()));
        assert!(slot.seize(hash.occupied()));
        assert!(is_claimed(slot.tag()));
        slot.vacate();
        assert_eq!(slot.tag(), EMPTY);
    }

    #[test]
    fn test_tombstone_is_free_and_matches_nothing() {
        let slot: Slot<()> = Slot::default();
        let hash = KeyHash::of([3, 4]);
        assert!(slot.try_claim(hash).is_ok());
        slot.bury();

        let tag = slot.tag();
        assert_eq!(tag, TOMBSTONE);
        assert!(!is_claimed(tag));
        assert!(!is_occupied(tag));
        for pid in 0..1000u64 {
            assert!(!KeyHash::of([pid, 0]).matches(TOMBSTONE));
        }

        // Only a claim expecting the tombstone succeeds.
        assert_eq!(slot.try_claim(hash), Err(TOMBSTONE));
        assert!(slot.try_claim_from(TOMBSTONE, hash).is_ok());
        assert!(is_claimed(slot.tag()));
    }
}
