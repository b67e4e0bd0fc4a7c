// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Configuration options for the sorter and column-archive planner.

use crate::compression::CompressionType;
use std::path::PathBuf;

/// Options accepted by [`crate::sorter::Sorter::new`].
#[derive(Clone, Debug)]
pub struct SorterOptions {
    /// Disambiguates ties between equal coordinate keys coming from
    /// independently-invoked sorters. `0` means "derive a value
    /// deterministically from a hash of the output path".
    pub shard_index: u32,

    /// Number of records buffered in memory before a batch is dispatched to
    /// a background spill worker.
    pub batch_size: usize,

    /// Number of background spill workers (and the depth of the bounded
    /// dispatch channel).
    pub parallelism: usize,

    /// Whether spill files are snappy-compressed.
    pub compress_tmp: bool,

    /// Directory spill files are created in.
    pub tmp_dir: PathBuf,
}

impl Default for SorterOptions {
    fn default() -> Self {
        Self {
            shard_index: 0,
            batch_size: 1 << 20,
            parallelism: 2,
            compress_tmp: true,
            tmp_dir: std::env::temp_dir(),
        }
    }
}

impl SorterOptions {
    /// Sets the shard index used for tie-breaking (`0` derives one from a
    /// hash of the output path).
    #[must_use]
    pub fn with_shard_index(mut self, shard_index: u32) -> Self {
        self.shard_index = shard_index;
        self
    }

    /// Sets the in-memory batch size, in records.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the number of background spill workers.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets whether spill files are compressed.
    #[must_use]
    pub fn with_compress_tmp(mut self, compress_tmp: bool) -> Self {
        self.compress_tmp = compress_tmp;
        self
    }

    /// Sets the spill directory.
    #[must_use]
    pub fn with_tmp_dir(mut self, tmp_dir: PathBuf) -> Self {
        self.tmp_dir = tmp_dir;
        self
    }

    pub(crate) fn spill_compression(&self) -> CompressionType {
        if self.compress_tmp {
            CompressionType::Snappy
        } else {
            CompressionType::None
        }
    }
}

/// Options accepted by the column-archive planner and shard writer.
#[derive(Clone, Debug)]
pub struct PlannerOptions {
    /// Target number of records per output shard.
    pub records_per_shard: i64,

    /// Number of parallel shard-writing workers.
    pub parallelism: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            records_per_shard: 1 << 20,
            parallelism: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl PlannerOptions {
    /// Sets the target records-per-shard.
    #[must_use]
    pub fn with_records_per_shard(mut self, records_per_shard: i64) -> Self {
        self.records_per_shard = records_per_shard;
        self
    }

    /// Sets the write-phase worker pool size.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }
}
