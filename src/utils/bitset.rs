//! Fixed-capacity sets of block serials.
//!
//! Dominator computation intersects one set per block on every round, so the
//! sets are stored as packed 64-bit words and combined word by word.
//!
//! ```rust
//! use deflatten::utils::BitSet;
//!
//! let mut set = BitSet::new(70);
//! set.insert(3);
//! set.insert(65);
//! assert!(set.contains(65));
//! assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 65]);
//! ```

use std::fmt;

const WORD_BITS: usize = 64;

/// A set of indices in `0..capacity`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
        }
    }

    /// Creates a set holding every index below `capacity`.
    #[must_use]
    pub fn full(capacity: usize) -> Self {
        let mut set = Self {
            words: vec![u64::MAX; capacity.div_ceil(WORD_BITS)],
            capacity,
        };
        set.trim_tail();
        set
    }

    /// Returns the capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if no index is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Adds `index`. Indices outside the capacity are ignored.
    ///
    /// Returns `true` if the index was newly added.
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        let added = self.words[word] & mask == 0;
        self.words[word] |= mask;
        added
    }

    /// Removes `index`.
    ///
    /// Returns `true` if the index was present.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        let present = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        present
    }

    /// Returns `true` if `index` is present.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    /// Returns the number of indices present.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Keeps only indices also present in `other`.
    ///
    /// Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.capacity, other.capacity);
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let next = *a & *b;
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    /// Iterates over the present indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }

    fn locate(index: usize) -> (usize, u64) {
        (index / WORD_BITS, 1u64 << (index % WORD_BITS))
    }

    fn trim_tail(&mut self) {
        let used = self.capacity % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << used) - 1;
            }
        }
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut set = BitSet::new(10);
        assert!(set.is_empty());
        assert!(set.insert(4));
        assert!(!set.insert(4));
        assert!(!set.insert(10));
        assert!(set.contains(4));
        assert!(!set.contains(99));
        assert!(set.remove(4));
        assert!(set.is_empty());
    }

    #[test]
    fn test_full_respects_capacity() {
        let set = BitSet::full(70);
        assert_eq!(set.count(), 70);
        assert_eq!(set.iter().last(), Some(69));
        assert!(BitSet::full(0).is_empty());
    }

    #[test]
    fn test_intersect_reports_change() {
        let mut a = BitSet::full(8);
        let mut b = BitSet::new(8);
        b.insert(1);
        b.insert(6);

        assert!(a.intersect_with(&b));
        assert!(!a.intersect_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 6]);
        assert_eq!(format!("{a:?}"), "{1, 6}");
    }
}
