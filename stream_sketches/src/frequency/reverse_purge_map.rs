//! Open-addressed hash map with rank-based purge
//!
//! The map backs the frequent-items sketch. It uses linear probing with a
//! per-slot probe-distance state byte: `states[i]` is 1 + the distance of
//! the key from its ideal slot, and 0 marks an empty slot. Deletion is the
//! Robin Hood backward shift, so the probe-distance invariant holds after
//! every operation and lookups never need tombstones.
//!
//! `purge` is the rank-based eviction of the Misra-Gries lineage: sample
//! active counts uniformly, find their median, subtract it everywhere, and
//! delete whatever drops to zero or below.

use crate::common::hash;
use crate::common::{Result, SketchError};
use rand::rngs::SmallRng;
use rand::Rng;
use std::hash::Hash;

const HASH_SEED: u64 = 0;

/// Minimum lg of the table length (length 4)
pub const LG_MIN_MAP_SIZE: u8 = 2;

/// Open-addressed linear-probing map from items to positive counts
#[derive(Debug, Clone)]
pub struct ReversePurgeHashMap<T> {
    lg_length: u8,
    keys: Vec<Option<T>>,
    values: Vec<i64>,
    states: Vec<u16>,
    num_active: usize,
}

impl<T: Hash + Eq> ReversePurgeHashMap<T> {
    /// Creates an empty map with `2^lg_length` slots
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` if `lg_length` is below the
    /// minimum (length 4) or above 26
    pub fn new(lg_length: u8) -> Result<Self> {
        if !(LG_MIN_MAP_SIZE..=26).contains(&lg_length) {
            return Err(SketchError::InvalidParameter {
                param: "lg_length".to_string(),
                value: lg_length.to_string(),
                constraint: format!("must be in range [{}, 26]", LG_MIN_MAP_SIZE),
            });
        }
        let length = 1usize << lg_length;
        Ok(ReversePurgeHashMap {
            lg_length,
            keys: std::iter::repeat_with(|| None).take(length).collect(),
            values: vec![0; length],
            states: vec![0; length],
            num_active: 0,
        })
    }

    /// lg of the table length
    pub fn lg_length(&self) -> u8 {
        self.lg_length
    }

    /// Table length (a power of two)
    pub fn len(&self) -> usize {
        1usize << self.lg_length
    }

    /// True when no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.num_active == 0
    }

    /// Number of occupied slots
    pub fn num_active(&self) -> usize {
        self.num_active
    }

    /// Usable capacity at the 3/4 load factor
    pub fn capacity(&self) -> usize {
        let len = self.len();
        len - len / 4
    }

    fn hash_of(item: &T) -> u64 {
        hash::hash_item(item, HASH_SEED)
    }

    /// Returns the count stored for `item`, or 0 when absent
    pub fn get(&self, item: &T) -> i64 {
        let mask = self.len() - 1;
        let mut probe = (Self::hash_of(item) as usize) & mask;
        while self.states[probe] > 0 {
            if self.keys[probe].as_ref() == Some(item) {
                return self.values[probe];
            }
            probe = (probe + 1) & mask;
        }
        0
    }

    /// Adds `delta` to the count of `item`, inserting it when absent
    ///
    /// `delta` must be positive; the caller enforces this.
    pub fn adjust(&mut self, item: T, delta: i64) {
        debug_assert!(delta > 0);
        let mask = self.len() - 1;
        let mut probe = (Self::hash_of(&item) as usize) & mask;
        let mut drift = 1u16;
        while self.states[probe] > 0 {
            if self.keys[probe].as_ref() == Some(&item) {
                self.values[probe] += delta;
                return;
            }
            probe = (probe + 1) & mask;
            drift += 1;
        }
        // first empty slot past the ideal one
        self.keys[probe] = Some(item);
        self.values[probe] = delta;
        self.states[probe] = drift;
        self.num_active += 1;
    }

    /// Evicts roughly the lower half of the counts
    ///
    /// Samples `min(sample_size, num_active)` values uniformly without
    /// replacement, subtracts their median from every active value, and
    /// deletes the entries that drop to zero or below. Returns the median,
    /// which the owning sketch folds into its error offset.
    pub fn purge(&mut self, sample_size: usize, rng: &mut SmallRng) -> i64 {
        let limit = sample_size.min(self.num_active);
        if limit == 0 {
            return 0;
        }

        // uniform sample without replacement over the active slots
        let mut samples: Vec<i64> = Vec::with_capacity(limit);
        let mut seen = 0u64;
        for i in 0..self.len() {
            if self.states[i] > 0 {
                seen += 1;
                if samples.len() < limit {
                    samples.push(self.values[i]);
                } else {
                    let j = rng.random_range(0..seen);
                    if (j as usize) < limit {
                        samples[j as usize] = self.values[i];
                    }
                }
            }
        }

        let mid = limit / 2;
        let (_, median, _) = samples.select_nth_unstable(mid);
        let median = *median;

        for i in 0..self.len() {
            if self.states[i] > 0 {
                self.values[i] -= median;
            }
        }
        self.delete_non_positive();
        median
    }

    /// Deletes every non-positive entry, restoring the probe invariant
    fn delete_non_positive(&mut self) {
        let length = self.len();
        // Start from the high end of the last cluster: the first empty
        // slot scanning down from the top. The load factor guarantees one.
        let mut first_probe = length - 1;
        while self.states[first_probe] > 0 {
            first_probe -= 1;
        }
        let mut probe = first_probe;
        while probe > 0 {
            probe -= 1;
            if self.states[probe] > 0 && self.values[probe] <= 0 {
                self.hash_delete(probe);
                self.num_active -= 1;
            }
        }
        // the cluster wrapping around the top, skipped above
        let mut probe = length;
        while probe > first_probe {
            probe -= 1;
            if self.states[probe] > 0 && self.values[probe] <= 0 {
                self.hash_delete(probe);
                self.num_active -= 1;
            }
        }
    }

    /// Robin Hood backward-shift deletion of the entry at `delete_probe`
    fn hash_delete(&mut self, mut delete_probe: usize) {
        self.states[delete_probe] = 0;
        self.keys[delete_probe] = None;
        self.values[delete_probe] = 0;
        let mask = self.len() - 1;
        let mut drift = 1u16;
        let mut probe = (delete_probe + 1) & mask;
        // pull displaced neighbors back until a slot at its ideal position
        // or an empty slot ends the cluster
        while self.states[probe] != 0 {
            if self.states[probe] > drift {
                self.keys[delete_probe] = self.keys[probe].take();
                self.values[delete_probe] = self.values[probe];
                self.states[delete_probe] = self.states[probe] - drift;
                self.states[probe] = 0;
                self.values[probe] = 0;
                drift = 0;
                delete_probe = probe;
            }
            probe = (probe + 1) & mask;
            drift += 1;
        }
    }

    /// Grows the table to `2^new_lg_length` slots, re-inserting every
    /// active entry at its new ideal position
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` when the new length would
    /// shrink the table or exceed the supported maximum
    pub fn resize(&mut self, new_lg_length: u8) -> Result<()> {
        if new_lg_length < self.lg_length {
            return Err(SketchError::InvalidParameter {
                param: "new_lg_length".to_string(),
                value: new_lg_length.to_string(),
                constraint: format!("must not shrink below {}", self.lg_length),
            });
        }
        let mut fresh = ReversePurgeHashMap::new(new_lg_length)?;
        for i in 0..self.len() {
            if self.states[i] > 0 {
                if let Some(key) = self.keys[i].take() {
                    fresh.adjust(key, self.values[i]);
                }
            }
        }
        *self = fresh;
        Ok(())
    }

    /// Iterates the active entries in arbitrary (slot) order
    ///
    /// The map must not be mutated while the iterator is live; the borrow
    /// checker enforces this.
    pub fn iter(&self) -> ActiveEntries<'_, T> {
        ActiveEntries { map: self, pos: 0 }
    }

    #[cfg(test)]
    fn probe_invariant_holds(&self) -> bool {
        let mask = self.len() - 1;
        for i in 0..self.len() {
            if self.states[i] == 0 {
                continue;
            }
            let Some(key) = self.keys[i].as_ref() else {
                return false;
            };
            if self.values[i] <= 0 {
                return false;
            }
            let ideal = (Self::hash_of(key) as usize) & mask;
            let distance = (i + self.len() - ideal) & mask;
            if self.states[i] as usize != distance + 1 {
                return false;
            }
        }
        true
    }
}

/// Iterator over the active `(item, count)` entries of a map
#[derive(Debug)]
pub struct ActiveEntries<'a, T> {
    map: &'a ReversePurgeHashMap<T>,
    pos: usize,
}

impl<'a, T> Iterator for ActiveEntries<'a, T> {
    type Item = (&'a T, i64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.map.states.len() {
            let i = self.pos;
            self.pos += 1;
            if self.map.states[i] > 0 {
                if let Some(key) = self.map.keys[i].as_ref() {
                    return Some((key, self.map.values[i]));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn seeded_rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    #[test]
    fn test_new_validates_lg_length() {
        assert!(ReversePurgeHashMap::<u64>::new(1).is_err());
        assert!(ReversePurgeHashMap::<u64>::new(27).is_err());
        assert!(ReversePurgeHashMap::<u64>::new(2).is_ok());
    }

    #[test]
    fn test_adjust_and_get() {
        let mut map = ReversePurgeHashMap::new(3).unwrap();
        map.adjust(7u64, 3);
        map.adjust(7u64, 2);
        map.adjust(9u64, 1);

        assert_eq!(map.get(&7), 5);
        assert_eq!(map.get(&9), 1);
        assert_eq!(map.get(&8), 0);
        assert_eq!(map.num_active(), 2);
    }

    #[test]
    fn test_capacity_is_three_quarters() {
        let map = ReversePurgeHashMap::<u64>::new(3).unwrap();
        assert_eq!(map.len(), 8);
        assert_eq!(map.capacity(), 6);
    }

    #[test]
    fn test_resize_preserves_entries() {
        let mut map = ReversePurgeHashMap::new(3).unwrap();
        for i in 0..6u64 {
            map.adjust(i, (i + 1) as i64);
        }
        map.resize(5).unwrap();

        assert_eq!(map.len(), 32);
        assert_eq!(map.num_active(), 6);
        for i in 0..6u64 {
            assert_eq!(map.get(&i), (i + 1) as i64);
        }
        assert!(map.probe_invariant_holds());
    }

    #[test]
    fn test_resize_rejects_shrink() {
        let mut map = ReversePurgeHashMap::<u64>::new(4).unwrap();
        assert!(map.resize(3).is_err());
    }

    #[test]
    fn test_purge_removes_low_counts() {
        let mut map = ReversePurgeHashMap::new(4).unwrap();
        for i in 0..8u64 {
            map.adjust(i, 1);
        }
        map.adjust(100u64, 50);

        let median = map.purge(256, &mut seeded_rng());
        assert_eq!(median, 1);
        assert_eq!(map.get(&100), 49);
        assert!(map.num_active() < 9);
        assert!(map.probe_invariant_holds());
    }

    #[test]
    fn test_purge_on_uniform_counts_empties_map() {
        let mut map = ReversePurgeHashMap::new(4).unwrap();
        for i in 0..10u64 {
            map.adjust(i, 3);
        }
        let median = map.purge(256, &mut seeded_rng());
        assert_eq!(median, 3);
        assert!(map.is_empty());
    }

    #[test]
    fn test_iter_yields_all_active() {
        let mut map = ReversePurgeHashMap::new(3).unwrap();
        for i in 0..5u64 {
            map.adjust(i, 10 + i as i64);
        }
        let mut entries: Vec<(u64, i64)> = map.iter().map(|(k, v)| (*k, v)).collect();
        entries.sort_unstable();
        assert_eq!(
            entries,
            vec![(0, 10), (1, 11), (2, 12), (3, 13), (4, 14)]
        );
    }

    proptest! {
        // after any sequence of adjusts, purges, and resizes, every
        // occupied slot records 1 + its probe distance and holds a
        // positive count
        #[test]
        fn prop_probe_invariant(
            keys in proptest::collection::vec(0u64..64, 1..200),
            seed in 0u64..1000
        ) {
            let mut map = ReversePurgeHashMap::new(4).unwrap();
            let mut rng = SmallRng::seed_from_u64(seed);
            for (n, k) in keys.iter().enumerate() {
                if map.num_active() >= map.capacity() {
                    if map.lg_length() < 6 {
                        map.resize(map.lg_length() + 1).unwrap();
                    } else {
                        map.purge(256, &mut rng);
                    }
                }
                map.adjust(*k, (n % 5 + 1) as i64);
                prop_assert!(map.probe_invariant_holds());
            }
        }

        #[test]
        fn prop_get_after_adjust(keys in proptest::collection::vec(0u64..32, 1..48)) {
            let mut map = ReversePurgeHashMap::new(6).unwrap();
            let mut expected = std::collections::HashMap::new();
            for k in keys {
                map.adjust(k, 2);
                *expected.entry(k).or_insert(0i64) += 2;
            }
            for (k, v) in expected {
                prop_assert_eq!(map.get(&k), v);
            }
        }
    }
}
