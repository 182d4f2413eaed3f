//! Byte-range coverage tracking.
//!
//! Completion is decided by which bytes have actually landed, not by how
//! many bytes were delivered: a retransmitted slice adds nothing here.

use std::collections::BTreeMap;
use std::ops::Range;

/// Set of merged, non-overlapping half-open byte ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    /// start -> end (exclusive). Adjacent and overlapping ranges are merged.
    ranges: BTreeMap<u64, u64>,
    covered: u64,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `[start, end)` and returns how many bytes were not covered before.
    pub fn insert(&mut self, start: u64, end: u64) -> u64 {
        if start >= end {
            return 0;
        }

        let mut new_start = start;
        let mut new_end = end;
        let mut absorbed = 0u64;

        // A range starting before `start` may overlap or touch it.
        if let Some((&s, &e)) = self.ranges.range(..=start).next_back() {
            if e >= start {
                new_start = s;
                new_end = new_end.max(e);
                absorbed += e - s;
                self.ranges.remove(&s);
            }
        }

        // Ranges starting inside (or right at the end of) the new one.
        let following: Vec<(u64, u64)> = self
            .ranges
            .range(new_start..=new_end)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in following {
            new_end = new_end.max(e);
            absorbed += e - s;
            self.ranges.remove(&s);
        }

        self.ranges.insert(new_start, new_end);
        let merged = new_end - new_start;
        let added = merged - absorbed;
        self.covered += added;
        added
    }

    /// Number of distinct bytes covered.
    pub fn covered(&self) -> u64 {
        self.covered
    }

    /// Returns `true` if every byte of `[start, end)` is covered.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        match self.ranges.range(..=start).next_back() {
            Some((_, &e)) => e >= end,
            None => false,
        }
    }

    /// Returns `true` when `[0, total)` is fully covered.
    pub fn is_complete(&self, total: u64) -> bool {
        self.covers(0, total)
    }

    /// Ranges of `[0, total)` that are still missing.
    pub fn gaps(&self, total: u64) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        let mut cursor = 0u64;
        for (&s, &e) in &self.ranges {
            if s >= total {
                break;
            }
            if s > cursor {
                gaps.push(cursor..s);
            }
            cursor = cursor.max(e);
        }
        if cursor < total {
            gaps.push(cursor..total);
        }
        gaps
    }

    /// Number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set() {
        let set = RangeSet::new();
        assert_eq!(set.covered(), 0);
        assert!(set.is_empty());
        assert!(!set.is_complete(1));
        assert_eq!(set.gaps(10), vec![0..10]);
    }

    #[test]
    fn disjoint_inserts() {
        let mut set = RangeSet::new();
        assert_eq!(set.insert(0, 4), 4);
        assert_eq!(set.insert(8, 10), 2);
        assert_eq!(set.len(), 2);
        assert_eq!(set.covered(), 6);
        assert_eq!(set.gaps(10), vec![4..8]);
    }

    #[test]
    fn adjacent_ranges_merge() {
        let mut set = RangeSet::new();
        set.insert(4, 8);
        set.insert(0, 4);
        set.insert(8, 10);
        assert_eq!(set.len(), 1);
        assert!(set.is_complete(10));
        assert!(set.gaps(10).is_empty());
    }

    #[test]
    fn duplicate_adds_nothing() {
        let mut set = RangeSet::new();
        assert_eq!(set.insert(0, 4), 4);
        assert_eq!(set.insert(0, 4), 0);
        assert_eq!(set.covered(), 4);
    }

    #[test]
    fn overlap_counts_only_new_bytes() {
        let mut set = RangeSet::new();
        set.insert(2, 6);
        assert_eq!(set.insert(0, 4), 2);
        assert_eq!(set.insert(5, 9), 3);
        assert_eq!(set.covered(), 9);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn insert_spanning_many_ranges() {
        let mut set = RangeSet::new();
        set.insert(1, 2);
        set.insert(3, 4);
        set.insert(5, 6);
        assert_eq!(set.insert(0, 7), 4);
        assert_eq!(set.len(), 1);
        assert_eq!(set.covered(), 7);
    }

    #[test]
    fn covers_partial_queries() {
        let mut set = RangeSet::new();
        set.insert(10, 20);
        assert!(set.covers(12, 18));
        assert!(set.covers(10, 20));
        assert!(!set.covers(5, 15));
        assert!(!set.covers(15, 25));
        assert!(set.covers(3, 3));
    }

    #[test]
    fn empty_range_ignored() {
        let mut set = RangeSet::new();
        assert_eq!(set.insert(5, 5), 0);
        assert!(set.is_empty());
    }
}
