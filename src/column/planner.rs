// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The column-archive shard-boundary planner: collects every input
//! shard's block-start keys without rereading any record data, and
//! selects boundaries that split the total record count into roughly
//! `records_per_shard`-sized output shards.
//!
//! Grounded on `level_manifest/mod.rs`'s "read every segment's metadata,
//! decide a partitioning, hand ranges to workers" shape; the per-input
//! byte-range lookup below mirrors `compaction/mod.rs`'s use of a
//! segment's block index to bound a range scan.

use std::path::{Path, PathBuf};

use crate::config::PlannerOptions;
use crate::key::CoordKey;
use crate::shard::{BlockIndexEntry, ShardTrailer};

/// Selects shard-split boundaries from the union of every input shard's
/// block-start keys.
///
/// `records_per_block` is the average computed from `total_records /
/// total_blocks`; `records_per_shard` is the target shard size. A boundary
/// is emitted every time the running total crosses a further multiple of
/// `records_per_shard`, using the *not-yet-counted* candidate as the
/// boundary value (with the reverse-strand bit cleared), skipping a
/// candidate equal to the last emitted boundary.
#[must_use]
pub(crate) fn compute_shard_bounds(candidates: &[CoordKey], records_per_block: i64, records_per_shard: i64) -> Vec<CoordKey> {
    if records_per_shard <= 0 {
        return Vec::new();
    }

    let mut boundaries = Vec::new();
    let mut cumulative: i64 = 0;
    let mut threshold: i64 = records_per_shard;
    let mut last_emitted: Option<CoordKey> = None;

    for &candidate in candidates {
        while cumulative >= threshold {
            let boundary = candidate.with_strand_cleared();
            if last_emitted != Some(boundary) {
                boundaries.push(boundary);
                last_emitted = Some(boundary);
            }
            threshold += records_per_shard;
        }
        cumulative += records_per_block;
    }

    boundaries
}

fn first_index_ge(blocks: &[BlockIndexEntry], key: CoordKey) -> usize {
    blocks.iter().position(|b| b.start_key >= key).unwrap_or(blocks.len())
}

/// The byte offset to back a sub-reader's scan up to so the first record
/// `>= key` is captured even when it straddles a block boundary.
#[must_use]
fn start_offset(blocks: &[BlockIndexEntry], key: CoordKey) -> u64 {
    if blocks.is_empty() {
        return 0;
    }
    let idx = first_index_ge(blocks, key).saturating_sub(1);
    blocks[idx.min(blocks.len() - 1)].file_offset
}

/// The byte offset a sub-reader's scan must stop before, i.e. the first
/// block whose start key is `>= limit`; `u64::MAX` (meaning "read to the
/// end of the file") if no such block exists.
#[must_use]
fn limit_offset(blocks: &[BlockIndexEntry], limit: CoordKey) -> u64 {
    let idx = first_index_ge(blocks, limit);
    blocks.get(idx).map_or(u64::MAX, |b| b.file_offset)
}

/// The result of the plan phase: an ordered list of output shard
/// coordinate ranges, plus every input shard's block index (for the write
/// phase's per-input byte-range lookups).
pub struct ShardBoundsPlanner {
    ranges: Vec<(CoordKey, CoordKey)>,
    inputs: Vec<(PathBuf, ShardTrailer)>,
}

impl ShardBoundsPlanner {
    /// Runs the plan phase over `shard_paths`: reads every input's trailer
    /// (footer + block index, no record data), then computes shard
    /// boundaries per [`compute_shard_bounds`].
    pub fn plan(shard_paths: &[PathBuf], options: &PlannerOptions) -> crate::Result<Self> {
        let mut inputs = Vec::with_capacity(shard_paths.len());
        let mut candidates = Vec::new();
        let mut total_records: i64 = 0;
        let mut total_blocks: i64 = 0;

        for path in shard_paths {
            let trailer = crate::shard::read_trailer(path)?;
            total_records += trailer.total_record_count as i64;
            total_blocks += trailer.blocks.len() as i64;
            candidates.extend(trailer.blocks.iter().map(|b| b.start_key));
            inputs.push((path.clone(), trailer));
        }

        candidates.sort();

        let records_per_block = if total_blocks == 0 { 0 } else { total_records / total_blocks };
        let boundaries = compute_shard_bounds(&candidates, records_per_block, options.records_per_shard);

        let mut ranges = Vec::with_capacity(boundaries.len() + 1);
        let mut start = CoordKey::MIN;
        for boundary in boundaries {
            ranges.push((start, boundary));
            start = boundary;
        }
        ranges.push((start, CoordKey::INFINITY));

        log::debug!(
            "column archive planner: {} inputs, {} blocks, {} shards",
            inputs.len(),
            total_blocks,
            ranges.len()
        );

        Ok(Self { ranges, inputs })
    }

    /// The planned output shard ranges, in order, partitioning
    /// `[0, INFINITY)`.
    #[must_use]
    pub fn shard_ranges(&self) -> &[(CoordKey, CoordKey)] {
        &self.ranges
    }

    /// Every input shard's path.
    #[must_use]
    pub fn input_paths(&self) -> impl Iterator<Item = &Path> {
        self.inputs.iter().map(|(path, _)| path.as_path())
    }

    /// The `(start_offset, limit_offset)` byte range a sub-reader opened
    /// against input shard `path` must use to cover `[start, limit)`
    /// for the write phase's per-input byte-range lookups.
    #[must_use]
    pub fn byte_range(&self, path: &Path, start: CoordKey, limit: CoordKey) -> Option<(u64, u64)> {
        let (_, trailer) = self.inputs.iter().find(|(p, _)| p == path)?;
        Some((start_offset(&trailer.blocks, start), limit_offset(&trailer.blocks, limit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn raw(v: u64) -> CoordKey {
        CoordKey::from_raw(v)
    }

    #[test]
    fn compute_shard_bounds_matches_worked_example() {
        let candidates = vec![raw(1), raw(2), raw(2), raw(2), raw(5), raw(6), raw(8)];
        let boundaries = compute_shard_bounds(&candidates, 100, 200);
        assert_eq!(boundaries, vec![raw(2), raw(4), raw(8)]);
    }

    #[test]
    fn compute_shard_bounds_empty_candidates_yields_no_boundaries() {
        assert!(compute_shard_bounds(&[], 100, 200).is_empty());
    }

    #[test]
    fn compute_shard_bounds_single_shard_when_total_below_threshold() {
        let candidates = vec![raw(1), raw(2)];
        let boundaries = compute_shard_bounds(&candidates, 10, 1_000_000);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn start_and_limit_offset_match_worked_example() {
        let blocks: Vec<BlockIndexEntry> = [(1u64, 10u64), (2, 11), (2, 12), (2, 13), (8, 14)]
            .into_iter()
            .map(|(start, offset)| BlockIndexEntry {
                start_key: raw(start),
                file_offset: offset,
                record_count: 1,
            })
            .collect();

        assert_eq!(start_offset(&blocks, raw(2)), 10);
        assert_eq!(limit_offset(&blocks, raw(2)), 11);
        assert_eq!(start_offset(&blocks, raw(1)), 0);
        assert_eq!(limit_offset(&blocks, raw(9)), u64::MAX);
        assert_eq!(start_offset(&blocks, raw(100)), 14);
    }
}
