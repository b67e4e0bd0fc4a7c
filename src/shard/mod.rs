// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The recordio-framed shard file format: a sequence of snappy-compressed
//! blocks of packed `(key, payload)` records, indexed by a trailer.
//!
//! Corruption discovered while reading an already-open shard file (bad
//! magic, a truncated block header, a key that goes backwards across a
//! block boundary) is a programmer-visible condition: it aborts the
//! process via [`crate::error::corrupt`] rather than being returned as a
//! [`crate::Error`].

pub mod header;
pub mod reader;
pub mod trailer;
pub mod writer;

pub use header::{merge_headers, ReferenceHeader};
pub use reader::{read_trailer, ReaderOptions, ShardReader};
pub use trailer::{BlockIndexEntry, ShardTrailer};
pub use writer::ShardWriter;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::checksum::Checksum;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::compression::CompressionType;
use crate::key::CoordKey;

/// Soft uncompressed-size limit for one block: the fixed 1 MiB
/// uncompressed limit.
pub const BLOCK_SIZE_LIMIT: usize = 1 << 20;

/// Minimum bytes needed to hold a packed-record header (`key | payload_len`);
/// below this, a block cannot signal its own end with a terminator key and
/// is simply flushed short.
pub(crate) const RECORD_HEADER_LEN: usize = 8 + 4;

const BLOCK_MAGIC: [u8; 4] = [b'S', b'H', b'B', 1];

/// Magic bytes opening the fixed-size footer written at the very end of a
/// shard file, pointing back at the variable-length trailer.
pub(crate) const FOOTER_MAGIC: [u8; 4] = [b'R', b'S', b'F', b'T'];

/// Footer size: magic (4) + trailer offset (8) + trailer length (4) +
/// trailer checksum (16).
pub(crate) const FOOTER_LEN: u64 = 4 + 8 + 4 + 16;

/// A block's on-disk framing header: magic, compression flag, checksum
/// (over the on-disk, possibly-compressed bytes), and both lengths.
///
/// Grounded on `segment/block/header.rs`'s "magic + checksum +
/// lengths" shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub compression: CompressionType,
    pub checksum: Checksum,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
}

impl Encode for BlockHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&BLOCK_MAGIC)?;
        self.compression.encode_into(writer)?;
        writer.write_u128::<BigEndian>(self.checksum.into_u128())?;
        writer.write_u32::<BigEndian>(self.compressed_len)?;
        writer.write_u32::<BigEndian>(self.uncompressed_len)?;
        Ok(())
    }
}

impl Decode for BlockHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != BLOCK_MAGIC {
            return Err(DecodeError::InvalidHeader("shard block magic"));
        }

        let compression = CompressionType::decode_from(reader)?;
        let checksum = Checksum::from_raw(reader.read_u128::<BigEndian>()?);
        let compressed_len = reader.read_u32::<BigEndian>()?;
        let uncompressed_len = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            compression,
            checksum,
            compressed_len,
            uncompressed_len,
        })
    }
}

/// Parses one decompressed block buffer into its packed `(key, payload)`
/// records: a pure function, independent of I/O and
/// compression, iterating `key (8 LE) | payload_len (4 LE) | payload_bytes`
/// triples and stopping at the terminator key or a short trailing header.
#[must_use]
pub fn parse_block(buf: &[u8]) -> Vec<(CoordKey, Vec<u8>)> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    loop {
        if buf.len() - offset < RECORD_HEADER_LEN {
            break;
        }

        let key = u64::from_le_bytes(
            #[allow(clippy::unwrap_used)]
            buf[offset..offset + 8].try_into().unwrap(),
        );
        if key == CoordKey::INFINITY.into_raw() {
            break;
        }

        #[allow(clippy::unwrap_used)]
        let payload_len = u32::from_le_bytes(buf[offset + 8..offset + 12].try_into().unwrap()) as usize;
        offset += RECORD_HEADER_LEN;

        if buf.len() - offset < payload_len {
            break;
        }

        let payload = buf[offset..offset + payload_len].to_vec();
        offset += payload_len;

        out.push((CoordKey::from_raw(key), payload));
    }

    out
}

/// Packs one `(key, payload)` record using the on-disk layout `parse_block`
/// expects.
pub(crate) fn pack_record(buf: &mut Vec<u8>, key: CoordKey, payload: &[u8]) {
    buf.extend_from_slice(&key.into_raw().to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
}
