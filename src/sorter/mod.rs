// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The external sorter: buffers records in memory up to a batch limit,
//! dispatches full batches to background spill workers, and on `close()`
//! performs a single multiway merge of the spills into one
//! coordinate-sorted shard file.
//!
//! Grounded on [`crate::shard`] writer/reader for the spill and final file
//! format, and on [`crate::merge_tree`] for the final multiway merge --
//! the sorter itself is new, generalizing `flush.rs`'s "memtable -> one
//! segment" shape to "N sorted batches -> one shard, via an intermediate
//! spill round".

mod worker;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::config::SorterOptions;
use crate::error::ErrorOnce;
use crate::pool::Pool;
use crate::record::{PayloadEncoder, Record, SortEntry};
use crate::shard::{ReaderOptions, ShardReader, ShardWriter};
use crate::MergeTree;

use worker::{spill_batch, BatchJob};

/// Buffers records up to `batch_size`, spills sorted batches in the
/// background, and merges them into one coordinate-sorted shard file on
/// `close()`.
pub struct Sorter {
    out_path: PathBuf,
    header_bytes: Vec<u8>,
    options: SorterOptions,
    shard_index: u32,

    current_batch: Vec<SortEntry>,
    records_dispatched: u64,
    next_batch_seq: u64,
    any_batch_dispatched: bool,

    tx: Option<Sender<BatchJob>>,
    workers: Vec<std::thread::JoinHandle<()>>,
    spills: Arc<Mutex<Vec<(u64, PathBuf)>>>,
    errors: Arc<ErrorOnce>,
    pool: Arc<Pool>,
}

impl Sorter {
    /// Opens a new sorter writing its final merged shard to `out_path`.
    ///
    /// If `options.shard_index == 0`, a tie-breaking shard index is
    /// derived deterministically from a hash of `out_path`, so
    /// independently invoked sorters targeting distinct outputs still
    /// tie-break distinctly.
    pub fn new(out_path: impl Into<PathBuf>, header_bytes: Vec<u8>, options: SorterOptions) -> crate::Result<Self> {
        let out_path = out_path.into();
        let shard_index = if options.shard_index == 0 {
            derive_shard_index(&out_path)
        } else {
            options.shard_index
        };

        let parallelism = options.parallelism.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<BatchJob>(parallelism);
        let spills = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(ErrorOnce::new());
        let pool = Arc::new(Pool::new(parallelism.max(2)));

        let mut workers = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let rx = rx.clone();
            let tmp_dir = options.tmp_dir.clone();
            let compression = options.spill_compression();
            let spills = Arc::clone(&spills);
            let errors = Arc::clone(&errors);
            let pool = Arc::clone(&pool);
            workers.push(std::thread::spawn(move || {
                worker::run(&rx, &tmp_dir, compression, &pool, &spills, &errors);
            }));
        }

        Ok(Self {
            out_path,
            header_bytes,
            options,
            shard_index,
            current_batch: Vec::new(),
            records_dispatched: 0,
            next_batch_seq: 0,
            any_batch_dispatched: false,
            tx: Some(tx),
            workers,
            spills,
            errors,
            pool,
        })
    }

    /// The tie-breaking shard index this sorter uses (either the
    /// caller-supplied value, or one derived from `out_path`).
    #[must_use]
    pub fn shard_index(&self) -> u32 {
        self.shard_index
    }

    /// Serializes `record` via `encode`, computes its key, and appends it
    /// to the current in-memory batch. Never reorders records before
    /// dispatch.
    pub fn add_record<E: PayloadEncoder>(&mut self, record: Record, encode: E) -> crate::Result<()> {
        let entry = SortEntry::from_record(&record, encode);
        self.current_batch.push(entry);

        if self.current_batch.len() >= self.options.batch_size {
            self.dispatch_batch()?;
        }

        Ok(())
    }

    /// Total records appended across `add_record` calls so far, including
    /// any still sitting in the in-flight batch.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.records_dispatched + self.current_batch.len() as u64
    }

    /// `true` if no records have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch_batch(&mut self) -> crate::Result<()> {
        let batch = std::mem::take(&mut self.current_batch);
        let batch_seq = self.next_batch_seq;
        self.next_batch_seq += 1;
        self.any_batch_dispatched = true;

        #[allow(clippy::cast_possible_truncation)]
        let tie_breaker_seed = (u64::from(self.shard_index) << 32) | (self.records_dispatched & 0xFFFF_FFFF);
        self.records_dispatched += batch.len() as u64;

        let job = BatchJob {
            batch_seq,
            entries: batch,
            tie_breaker_seed,
        };

        #[allow(clippy::unwrap_used)]
        let tx = self.tx.as_ref().unwrap();
        if tx.send(job).is_err() {
            // Every worker has already died; the error is latched in
            // `self.errors` and will surface from `close()`.
            log::warn!("sorter dispatch channel closed early; a worker must have panicked");
        }

        Ok(())
    }

    /// Dispatches the final (possibly empty) batch, waits for all
    /// background workers, merges every spill file into `out_path`, and
    /// removes the spills.
    ///
    /// Returns the first error encountered on any path.
    pub fn close(mut self) -> crate::Result<()> {
        if !self.current_batch.is_empty() || !self.any_batch_dispatched {
            self.dispatch_batch()?;
        }

        // Dropping the sender closes the channel once queued jobs drain,
        // which is how worker threads learn to stop.
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("sorter spill worker thread panicked");
            }
        }

        let spill_paths: Vec<PathBuf> = {
            #[allow(clippy::unwrap_used)]
            let mut spills = self.spills.lock().unwrap();
            spills.sort_by_key(|(seq, _)| *seq);
            spills.iter().map(|(_, path)| path.clone()).collect()
        };

        if let Some(err) = self.errors.take() {
            cleanup_spills(&spill_paths);
            return Err(latched_error_to_owned(&err));
        }

        let result = self.merge_spills(&spill_paths);
        cleanup_spills(&spill_paths);
        result
    }

    fn merge_spills(&self, spill_paths: &[PathBuf]) -> crate::Result<()> {
        let mut leaves = Vec::with_capacity(spill_paths.len());
        for path in spill_paths {
            leaves.push(ShardReader::open(path, ReaderOptions::default())?);
        }

        let out_file = std::fs::File::create(&self.out_path)?;
        let mut writer = Some(ShardWriter::new(
            out_file,
            self.header_bytes.clone(),
            self.options.spill_compression(),
            Arc::clone(&self.pool),
        ));

        if leaves.is_empty() {
            #[allow(clippy::unwrap_used)]
            writer.take().unwrap().finish()?;
            return Ok(());
        }

        let tree = MergeTree::new(leaves)?;
        tree.merge_into(|key, payload| {
            #[allow(clippy::unwrap_used)]
            writer.as_mut().unwrap().add(key, payload)?;
            Ok(true)
        })?;

        #[allow(clippy::unwrap_used)]
        writer.take().unwrap().finish()?;

        log::debug!(
            "sorter {} merged {} spills into {}",
            self.shard_index,
            spill_paths.len(),
            self.out_path.display()
        );

        Ok(())
    }
}

fn cleanup_spills(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("failed to remove spill file {}: {e}", path.display());
        }
    }
}

fn latched_error_to_owned(err: &Arc<crate::Error>) -> crate::Error {
    crate::Error::Io(std::io::Error::other(err.to_string()))
}

fn derive_shard_index(out_path: &std::path::Path) -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    out_path.hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    let hash = hasher.finish() as u32;
    // Never derive to 0 -- that value is reserved to mean "derive one".
    if hash == 0 {
        1
    } else {
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::with_length_prefix;
    use crate::shard::ReaderOptions as RdrOpts;
    use test_log::test;

    fn encode(rec: &Record) -> Vec<u8> {
        with_length_prefix(&rec.payload)
    }

    #[test]
    fn sorter_sorts_single_batch() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let out_path = dir.path().join("shard-0");

        let mut sorter = Sorter::new(
            &out_path,
            b"hdr".to_vec(),
            SorterOptions::default().with_shard_index(1),
        )?;

        sorter.add_record(Record::mapped(0, 100, false, b"A".to_vec()), encode)?;
        sorter.add_record(Record::mapped(1, 50, false, b"B".to_vec()), encode)?;
        sorter.add_record(Record::mapped(0, 100, true, b"C".to_vec()), encode)?;
        sorter.add_record(Record::mapped(0, 50, false, b"D".to_vec()), encode)?;
        sorter.close()?;

        let mut reader = ShardReader::open(&out_path, RdrOpts::default())?;
        let mut payloads = Vec::new();
        while reader.scan()? {
            #[allow(clippy::unwrap_used)]
            let (_, payload) = reader.current().unwrap();
            payloads.push(crate::record::strip_length_prefix(payload).to_vec());
        }

        // S1: (0,50,F), (0,100,F), (0,100,R), (1,50,F)
        assert_eq!(payloads, vec![b"D".to_vec(), b"A".to_vec(), b"C".to_vec(), b"B".to_vec()]);
        Ok(())
    }

    #[test]
    fn sorter_splits_across_multiple_spill_batches() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let out_path = dir.path().join("shard-0");

        let mut sorter = Sorter::new(
            &out_path,
            Vec::new(),
            SorterOptions::default().with_batch_size(4).with_parallelism(2),
        )?;

        for pos in (0..40).rev() {
            sorter.add_record(Record::mapped(0, pos, false, format!("r{pos}").into_bytes()), encode)?;
        }
        sorter.close()?;

        let mut reader = ShardReader::open(&out_path, RdrOpts::default())?;
        let mut positions = Vec::new();
        while reader.scan()? {
            #[allow(clippy::unwrap_used)]
            let (key, _) = reader.current().unwrap();
            positions.push(key.unpack().1);
        }

        let mut expected: Vec<i32> = (0..40).collect();
        expected.sort_unstable();
        assert_eq!(positions, expected);
        Ok(())
    }

    #[test]
    fn empty_sorter_produces_empty_shard() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let out_path = dir.path().join("empty-shard");

        let sorter = Sorter::new(&out_path, b"hdr".to_vec(), SorterOptions::default())?;
        sorter.close()?;

        let mut reader = ShardReader::open(&out_path, RdrOpts::default())?;
        assert_eq!(reader.header(), b"hdr");
        assert_eq!(reader.total_record_count(), 0);
        assert!(!reader.scan()?);
        Ok(())
    }

    #[test]
    fn shard_index_zero_derives_distinct_values_per_path() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = Sorter::new(dir.path().join("a"), Vec::new(), SorterOptions::default())?;
        let b = Sorter::new(dir.path().join("b"), Vec::new(), SorterOptions::default())?;
        assert_ne!(a.shard_index(), b.shard_index());
        assert_ne!(a.shard_index(), 0);
        a.close()?;
        b.close()?;
        Ok(())
    }

    /// Property 1 (sort correctness): a randomly shuffled batch of records,
    /// fed through a sorter with a small `batch_size` (so the input splits
    /// across several spill batches and workers), must come back as a
    /// permutation of the input, non-decreasing in coordinate key.
    #[test]
    fn randomized_records_sort_into_non_decreasing_key_order() -> crate::Result<()> {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let dir = tempfile::tempdir()?;
        let out_path = dir.path().join("shard-0");

        let mut rng = rand::rng();
        let mut records: Vec<Record> = (0..500)
            .map(|i| {
                let ref_id = rng.random_range(0..4);
                let position = rng.random_range(0..1000);
                let reverse = rng.random_bool(0.5);
                Record::mapped(ref_id, position, reverse, format!("rec-{i}").into_bytes())
            })
            .collect();
        records.shuffle(&mut rng);

        let mut expected_keys: Vec<_> = records.iter().map(Record::key).collect();
        expected_keys.sort();

        let mut sorter = Sorter::new(
            &out_path,
            Vec::new(),
            SorterOptions::default().with_batch_size(37).with_parallelism(3),
        )?;
        for record in &records {
            sorter.add_record(record.clone(), encode)?;
        }
        sorter.close()?;

        let mut reader = ShardReader::open(&out_path, RdrOpts::default())?;
        let mut seen_keys = Vec::new();
        let mut seen_payloads = std::collections::HashSet::new();
        while reader.scan()? {
            #[allow(clippy::unwrap_used)]
            let (key, payload) = reader.current().unwrap();
            seen_keys.push(*key);
            seen_payloads.insert(crate::record::strip_length_prefix(payload).to_vec());
        }

        assert_eq!(seen_keys, expected_keys, "output must be non-decreasing in coordinate key");

        let expected_payloads: std::collections::HashSet<_> =
            records.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(seen_payloads, expected_payloads, "output must be a permutation of the input");
        Ok(())
    }
}
