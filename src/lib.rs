// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! External sort-and-merge engine for aligned sequencing reads, plus the
//! column-oriented storage codec that engine writes and reads.
//!
//! The crate ingests already-decoded aligned read records, sorts them by
//! genomic coordinate in bounded memory via [`Sorter`], persists
//! coordinate-sorted shard files via [`shard`], and later merges any number
//! of shards into either a single block-gzipped container
//! ([`ContainerWriter`]) or a sharded column-oriented archive
//! ([`column::ColumnArchiveWriter`]) suitable for parallel scan by genomic
//! range.
//!
//! ```
//! use readsort::{CoordKey, Record, Sorter, SorterOptions};
//! # use tempfile::tempdir;
//! # fn encode(rec: &Record) -> Vec<u8> { rec.payload.clone() }
//! # let dir = tempdir()?;
//! let out_path = dir.path().join("shard-0");
//!
//! let mut sorter = Sorter::new(out_path, Vec::new(), SorterOptions::default())?;
//!
//! sorter.add_record(Record::mapped(0, 100, false, b"read-a".to_vec()), encode)?;
//! sorter.add_record(Record::mapped(0, 50, false, b"read-b".to_vec()), encode)?;
//!
//! sorter.close()?;
//! # Ok::<(), readsort::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod checksum;
pub mod coding;
pub mod column;
pub mod compression;
pub mod config;
pub mod container;
pub mod error;
pub mod key;
pub mod merge_tree;
pub mod pool;
pub mod record;
pub mod shard;
pub mod sorter;

pub use checksum::Checksum;
pub use coding::{Decode, DecodeError, Encode, EncodeError};
pub use column::{ColumnArchiveWriter, ShardBoundsPlanner};
pub use compression::CompressionType;
pub use config::{PlannerOptions, SorterOptions};
pub use container::ContainerWriter;
pub use error::{Error, Result};
pub use key::{Address, CoordKey};
pub use merge_tree::MergeTree;
pub use record::{PayloadEncoder, Record, SortEntry};
pub use sorter::Sorter;
