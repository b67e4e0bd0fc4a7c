// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Background spill workers: each worker consumes `(batch,
//! tie_breaker_seed)` jobs from a bounded channel, stable-sorts the batch,
//! and writes it to `tmp_dir` as one uncompressed-trailer shard file via
//! [`crate::shard::ShardWriter`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;

use crate::compression::CompressionType;
use crate::error::ErrorOnce;
use crate::pool::Pool;
use crate::record::SortEntry;
use crate::shard::ShardWriter;

/// One dispatched batch, tagged with its dispatch order (`batch_seq`, used
/// by the sorter to reassemble spills in dispatch order for the final
/// merge's tie-breaking) and a seed for tie-breaking across sibling
/// batches of one sorter.
pub(super) struct BatchJob {
    pub batch_seq: u64,
    pub entries: Vec<SortEntry>,
    #[allow(dead_code)] // ordering is achieved structurally by merging
    // spill readers in `batch_seq` order through the merge tree's rank
    // tie-break instead of consulting this value directly.
    pub tie_breaker_seed: u64,
}

/// Runs one worker's consume loop until the channel closes.
pub(super) fn run(
    rx: &Receiver<BatchJob>,
    tmp_dir: &Path,
    compression: CompressionType,
    pool: &Arc<Pool>,
    spills: &Arc<Mutex<Vec<(u64, PathBuf)>>>,
    errors: &Arc<ErrorOnce>,
) {
    while let Ok(job) = rx.recv() {
        match spill_batch(job.entries, tmp_dir, compression, pool) {
            Ok(path) => {
                #[allow(clippy::unwrap_used)]
                spills.lock().unwrap().push((job.batch_seq, path));
            }
            Err(e) => {
                log::warn!("sorter worker failed to spill batch {}: {e}", job.batch_seq);
                errors.set_if_empty(e);
            }
        }
    }
}

/// Stable-sorts `entries` by `(key, payload_bytes)` lexicographically and
/// writes the result as a shard file in `tmp_dir`, returning its path.
pub(super) fn spill_batch(
    mut entries: Vec<SortEntry>,
    tmp_dir: &Path,
    compression: CompressionType,
    pool: &Arc<Pool>,
) -> crate::Result<PathBuf> {
    entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.payload.cmp(&b.payload)));

    let mut tmp = tempfile::Builder::new()
        .prefix("readsort-spill-")
        .suffix(".tmp")
        .tempfile_in(tmp_dir)?;

    {
        let mut writer = ShardWriter::new(tmp.as_file_mut(), Vec::new(), compression, Arc::clone(pool));
        for entry in &entries {
            writer.add(entry.key, &entry.payload)?;
        }
        writer.finish()?;
    }

    tmp.into_temp_path().keep().map_err(|e| crate::Error::Io(e.error))
}
