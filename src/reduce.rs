//! Bounded-memory vocabulary reduction.
//!
//! The vocabulary, the counts, both embedding matrices and both accumulator
//! matrices share one index space. Reduction computes a [`Compaction`] once
//! and applies that same map to each of them, so index `i` keeps meaning the
//! same word everywhere.

use crate::count;

/// A relabeling of the index space `0..len`: each old index maps either to
/// a new index or to nothing (evicted). Survivors keep their relative order
/// and are packed into `0..kept()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compaction {
    new_index: Vec<Option<usize>>,
    kept: usize,
}

impl Compaction {
    pub fn keep_where(len: usize, mut keep: impl FnMut(usize) -> bool) -> Self {
        let mut kept = 0;
        let new_index = (0..len)
            .map(|i| {
                if keep(i) {
                    kept += 1;
                    Some(kept - 1)
                } else {
                    None
                }
            })
            .collect();
        Compaction { new_index, kept }
    }

    /// Size of the old index space.
    pub fn len(&self) -> usize {
        self.new_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_index.is_empty()
    }

    pub fn kept(&self) -> usize {
        self.kept
    }

    pub fn new_index(&self, old: usize) -> Option<usize> {
        self.new_index.get(old).copied().flatten()
    }

    /// `(old, new)` pairs in ascending order. `new <= old` always holds.
    pub fn survivors(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.new_index
            .iter()
            .enumerate()
            .filter_map(|(old, new)| new.map(|new| (old, new)))
    }
}

/// One Misra-Gries pass over the live counts `counts[..live]`.
///
/// Keeps every index whose count is above 1, decrements the survivors and
/// moves them to their new positions, and zeroes the rest of `counts`.
/// Returns the compaction to mirror onto the other structures and the new
/// total count.
///
/// Retained frequencies end up one lower than observed; the returned total
/// is consistent with that.
pub fn misra_gries(counts: &mut [count], live: usize) -> (Compaction, count) {
    let compaction = Compaction::keep_where(live, |i| counts[i] > 1);
    let mut total = 0;
    for (old, new) in compaction.survivors() {
        counts[new] = counts[old] - 1;
        total += counts[new];
    }
    counts[compaction.kept()..].fill(0);
    (compaction, total)
}
