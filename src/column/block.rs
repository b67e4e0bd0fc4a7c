// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The column-field file's on-disk framing: block payload layout,
//! block index entries (`start_addr`, `end_addr`, `num_records`), and the
//! per-field trailer.
//!
//! Reuses [`crate::shard::BlockHeader`] for the block's on-disk framing
//! (magic, compression, checksum, lengths) rather than inventing a second
//! framing scheme -- the column-field file and the shard file are both
//! "a sequence of checksummed, optionally-compressed blocks plus a
//! trailer", so one block header format covers both.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::compression::CompressionType;
use crate::key::Address;

/// Soft uncompressed-size limit for one column-field block; shares the
/// shard format's block size budget since both formats serve the same
/// "bounded streaming unit" role.
pub(crate) const BLOCK_SIZE_LIMIT: usize = crate::shard::BLOCK_SIZE_LIMIT;

pub(crate) const TRAILER_MAGIC: [u8; 4] = [b'R', b'S', b'C', 1];
pub(crate) const FOOTER_MAGIC: [u8; 4] = [b'R', b'S', b'C', b'F'];
pub(crate) const FOOTER_LEN: u64 = 4 + 8 + 4 + 16;

/// Packs one block's payload: `default_len (4) | blob_len (4) | default
/// bytes | blob bytes`.
pub(crate) fn pack_regions(default: &[u8], blob: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + default.len() + blob.len());
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(default.len() as u32).to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    buf.extend_from_slice(default);
    buf.extend_from_slice(blob);
    buf
}

/// Splits a decompressed block buffer back into its default/blob regions.
pub(crate) fn unpack_regions(buf: &[u8]) -> (&[u8], &[u8]) {
    if buf.len() < 8 {
        return (&[], &[]);
    }
    #[allow(clippy::unwrap_used)]
    let default_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let rest = &buf[8..];
    let default_len = default_len.min(rest.len());
    rest.split_at(default_len)
}

/// One column-field block's index entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ColumnBlockIndexEntry {
    pub start_addr: Address,
    pub end_addr: Address,
    pub num_records: u32,
    pub file_offset: u64,
}

impl Encode for ColumnBlockIndexEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        encode_address(writer, self.start_addr)?;
        encode_address(writer, self.end_addr)?;
        writer.write_u32::<BigEndian>(self.num_records)?;
        writer.write_u64::<BigEndian>(self.file_offset)?;
        Ok(())
    }
}

impl Decode for ColumnBlockIndexEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            start_addr: decode_address(reader)?,
            end_addr: decode_address(reader)?,
            num_records: reader.read_u32::<BigEndian>()?,
            file_offset: reader.read_u64::<BigEndian>()?,
        })
    }
}

fn encode_address<W: Write>(writer: &mut W, addr: Address) -> Result<(), EncodeError> {
    writer.write_i32::<BigEndian>(addr.ref_id)?;
    writer.write_i32::<BigEndian>(addr.pos)?;
    writer.write_u32::<BigEndian>(addr.seq)?;
    Ok(())
}

fn decode_address<R: Read>(reader: &mut R) -> Result<Address, DecodeError> {
    Ok(Address {
        ref_id: reader.read_i32::<BigEndian>()?,
        pos: reader.read_i32::<BigEndian>()?,
        seq: reader.read_u32::<BigEndian>()?,
    })
}

/// Per-field statistics carried alongside the block index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FieldStats {
    pub total_records: u64,
    pub total_uncompressed_bytes: u64,
}

impl Encode for FieldStats {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.total_records)?;
        writer.write_u64::<BigEndian>(self.total_uncompressed_bytes)?;
        Ok(())
    }
}

impl Decode for FieldStats {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            total_records: reader.read_u64::<BigEndian>()?,
            total_uncompressed_bytes: reader.read_u64::<BigEndian>()?,
        })
    }
}

/// A column-field file's trailer: magic, version, compression, the block
/// index, and field-level statistics, written once on `close()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnFieldTrailer {
    pub version: u16,
    pub compression: CompressionType,
    pub blocks: Vec<ColumnBlockIndexEntry>,
    pub stats: FieldStats,
}

impl ColumnFieldTrailer {
    pub(crate) const VERSION: u16 = 1;
}

impl Encode for ColumnFieldTrailer {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&TRAILER_MAGIC)?;
        writer.write_u16::<BigEndian>(self.version)?;
        self.compression.encode_into(writer)?;
        self.stats.encode_into(writer)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.blocks.len() as u32)?;
        for entry in &self.blocks {
            entry.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for ColumnFieldTrailer {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != TRAILER_MAGIC {
            return Err(DecodeError::InvalidHeader("column field trailer magic"));
        }

        let version = reader.read_u16::<BigEndian>()?;
        let compression = CompressionType::decode_from(reader)?;
        let stats = FieldStats::decode_from(reader)?;

        let block_count = reader.read_u32::<BigEndian>()? as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(ColumnBlockIndexEntry::decode_from(reader)?);
        }

        Ok(Self {
            version,
            compression,
            blocks,
            stats,
        })
    }
}
