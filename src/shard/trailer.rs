// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The shard file's trailer: a per-block index plus the encoded source
//! header bytes and the file's compression flag, written once on
//! `finish()`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::compression::CompressionType;
use crate::key::CoordKey;

/// One entry of a shard file's block index: `(start_key, file_offset,
/// record_count)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockIndexEntry {
    /// The key of the first record packed into this block.
    pub start_key: CoordKey,
    /// Byte offset of the block's header within the shard file.
    pub file_offset: u64,
    /// Number of records packed into this block.
    pub record_count: u32,
}

impl Encode for BlockIndexEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.start_key.into_raw())?;
        writer.write_u64::<BigEndian>(self.file_offset)?;
        writer.write_u32::<BigEndian>(self.record_count)?;
        Ok(())
    }
}

impl Decode for BlockIndexEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            start_key: CoordKey::from_raw(reader.read_u64::<BigEndian>()?),
            file_offset: reader.read_u64::<BigEndian>()?,
            record_count: reader.read_u32::<BigEndian>()?,
        })
    }
}

/// The shard file's trailer: an index over the file's blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardTrailer {
    /// Compression applied to every block in this file.
    pub compression: CompressionType,
    /// The collaborator-encoded source header bytes (opaque to this crate).
    pub header_bytes: Vec<u8>,
    /// Total number of records across all blocks.
    pub total_record_count: u64,
    /// Per-block index, in file order.
    pub blocks: Vec<BlockIndexEntry>,
}

impl ShardTrailer {
    /// An empty trailer for a shard with zero records.
    #[must_use]
    pub fn empty(compression: CompressionType, header_bytes: Vec<u8>) -> Self {
        Self {
            compression,
            header_bytes,
            total_record_count: 0,
            blocks: Vec::new(),
        }
    }
}

impl Encode for ShardTrailer {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.compression.encode_into(writer)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.header_bytes.len() as u32)?;
        writer.write_all(&self.header_bytes)?;

        writer.write_u64::<BigEndian>(self.total_record_count)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.blocks.len() as u32)?;
        for entry in &self.blocks {
            entry.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for ShardTrailer {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let compression = CompressionType::decode_from(reader)?;

        let header_len = reader.read_u32::<BigEndian>()? as usize;
        let mut header_bytes = vec![0u8; header_len];
        reader.read_exact(&mut header_bytes)?;

        let total_record_count = reader.read_u64::<BigEndian>()?;

        let block_count = reader.read_u32::<BigEndian>()? as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(BlockIndexEntry::decode_from(reader)?);
        }

        Ok(Self {
            compression,
            header_bytes,
            total_record_count,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn trailer_roundtrip() -> Result<(), DecodeError> {
        let trailer = ShardTrailer {
            compression: CompressionType::Snappy,
            header_bytes: b"source-header".to_vec(),
            total_record_count: 42,
            blocks: vec![
                BlockIndexEntry {
                    start_key: CoordKey::mapped(0, 0, false),
                    file_offset: 0,
                    record_count: 20,
                },
                BlockIndexEntry {
                    start_key: CoordKey::mapped(0, 1000, false),
                    file_offset: 512,
                    record_count: 22,
                },
            ],
        };

        let bytes = trailer.encode_into_vec();
        let decoded = ShardTrailer::decode_from(&mut Cursor::new(bytes))?;
        assert_eq!(trailer, decoded);
        Ok(())
    }

    #[test]
    fn empty_trailer_roundtrip() -> Result<(), DecodeError> {
        let trailer = ShardTrailer::empty(CompressionType::None, Vec::new());
        let bytes = trailer.encode_into_vec();
        let decoded = ShardTrailer::decode_from(&mut Cursor::new(bytes))?;
        assert_eq!(trailer, decoded);
        Ok(())
    }
}
