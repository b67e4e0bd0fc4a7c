// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The column-oriented storage codec: a directory of per-field,
//! recordio-framed files covering disjoint
//! coordinate ranges, written by merging any number of coordinate-sorted
//! shard files and projecting each merged record's fields out to their own
//! file.
//!
//! Submodule layout mirrors the write pipeline: [`address`] assigns
//! per-coordinate sequence numbers, [`codec`] defines the per-field
//! encodings, [`block`] frames one field file's blocks and trailer,
//! [`writer`]/[`reader`] stream one field's blocks, [`planner`] selects
//! shard boundaries from input block indices without reading record data,
//! and [`archive`] orchestrates the whole write phase.

pub mod address;
pub mod archive;
pub mod block;
pub mod codec;
pub mod planner;
pub mod reader;
pub mod writer;

pub use address::AddressGenerator;
pub use archive::{ColumnArchiveWriter, FieldDecoder, FileRemover};
pub use block::{ColumnBlockIndexEntry, ColumnFieldTrailer, FieldStats};
pub use codec::{AlignedFields, AuxCodec, AuxTag, CigarCodec, CoordCodec, FieldCodec, FlagCodec, MapqCodec, NameCodec, QualCodec, SeqCodec, VarIntCodec};
pub use planner::ShardBoundsPlanner;
pub use reader::FieldBlockReader;
pub use writer::FieldBlockWriter;
