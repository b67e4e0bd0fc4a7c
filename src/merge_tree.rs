// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The k-way merge tree: an ordered structure over leaf
//! iterators with a peek-ahead optimization that amortizes a long
//! monotonic run from a single leaf to O(1) per record instead of
//! `O(log n)`.
//!
//! Used both by [`crate::sorter::Sorter`]'s final in-shard merge and by the
//! column-archive write phase's per-output-range merge.

use std::collections::BTreeSet;

use crate::key::CoordKey;

/// One merge-tree input: a leaf that produces a non-decreasing sequence of
/// `(key, payload)` pairs.
///
/// Grounded on `merge.rs`/`merge_peekable.rs`'s iterator-like leaf
/// abstraction, generalized to an explicit trait so both
/// [`crate::shard::ShardReader`] and any future in-memory leaf can be
/// merged by the same tree.
pub trait MergeLeaf {
    /// Advances to the next record. Returns `Ok(false)` at end-of-stream.
    fn advance(&mut self) -> crate::Result<bool>;

    /// The key of the record the leaf is currently positioned on, if any.
    fn key(&self) -> Option<CoordKey>;

    /// Takes the payload of the record the leaf is currently positioned on.
    fn take_payload(&mut self) -> Vec<u8>;

    /// Releases any background resources the leaf holds. Called on merge
    /// abort or exhaustion.
    fn drain(&mut self);
}

impl MergeLeaf for crate::shard::ShardReader {
    fn advance(&mut self) -> crate::Result<bool> {
        self.scan()
    }

    fn key(&self) -> Option<CoordKey> {
        self.current().map(|(k, _)| *k)
    }

    fn take_payload(&mut self) -> Vec<u8> {
        self.current().map(|(_, payload)| payload.clone()).unwrap_or_default()
    }

    fn drain(&mut self) {
        crate::shard::ShardReader::drain(self);
    }
}

/// An ordered tree over `leaf_rank`-tagged leaves, merging them into one
/// non-decreasing sequence with ties broken by `leaf_rank`.
pub struct MergeTree<L: MergeLeaf> {
    tree: BTreeSet<(CoordKey, usize)>,
    leaves: Vec<L>,
}

impl<L: MergeLeaf> MergeTree<L> {
    /// Builds a merge tree over `leaves`, in rank order (the first leaf is
    /// rank 0, the tie-break winner among equal keys).
    pub fn new(mut leaves: Vec<L>) -> crate::Result<Self> {
        let mut tree = BTreeSet::new();

        for (rank, leaf) in leaves.iter_mut().enumerate() {
            if leaf.advance()? {
                #[allow(clippy::unwrap_used)]
                tree.insert((leaf.key().unwrap(), rank));
            }
        }

        Ok(Self { tree, leaves })
    }

    /// `true` if no leaf has a record remaining.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Merges all leaves into one non-decreasing sequence, invoking
    /// `callback` for each emitted `(key, payload)` pair. Returning `false`
    /// from `callback` aborts the merge early.
    ///
    /// Every leaf's [`MergeLeaf::drain`] is invoked once, whether the merge
    /// ran to exhaustion or was aborted.
    pub fn merge_into<F>(mut self, mut callback: F) -> crate::Result<()>
    where
        F: FnMut(CoordKey, &[u8]) -> crate::Result<bool>,
    {
        let result = self.run(&mut callback);

        for leaf in &mut self.leaves {
            leaf.drain();
        }

        result
    }

    fn run<F>(&mut self, callback: &mut F) -> crate::Result<()>
    where
        F: FnMut(CoordKey, &[u8]) -> crate::Result<bool>,
    {
        loop {
            let Some(&(mut current_key, rank)) = self.tree.iter().next() else {
                break;
            };
            let original = (current_key, rank);
            let second = self.tree.iter().nth(1).copied();

            loop {
                let payload = self.leaves[rank].take_payload();
                if !callback(current_key, &payload)? {
                    self.tree.remove(&original);
                    return Ok(());
                }

                if !self.leaves[rank].advance()? {
                    self.tree.remove(&original);
                    break;
                }

                #[allow(clippy::unwrap_used)]
                let next_key = self.leaves[rank].key().unwrap();

                // Compare the full `(key, rank)` tuple against the runner-up,
                // not just the key: if this leaf advances into a tie with a
                // lower-rank leaf, that leaf must win the tie, so this leaf
                // has to be reinserted and re-contended for rather than kept
                // advancing in the tight inner loop.
                if second.is_some_and(|sk| (next_key, rank) >= sk) {
                    self.tree.remove(&original);
                    self.tree.insert((next_key, rank));
                    break;
                }

                current_key = next_key;
            }
        }

        Ok(())
    }
}
