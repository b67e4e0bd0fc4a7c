// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block compression. Shard files and column-field files each carry a
//! per-file compression flag in their trailer; today the only supported
//! algorithm is snappy, via the `snap` crate.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Compression algorithm used for a block's payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression.
    None,

    /// Snappy compression (recommended; used by default for spill and
    /// archive blocks).
    Snappy,
}

impl CompressionType {
    /// Compresses `data`, or returns it unchanged for [`Self::None`].
    #[must_use]
    pub fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None => data.to_vec(),
            Self::Snappy => {
                let mut encoder = snap::raw::Encoder::new();
                #[allow(clippy::unwrap_used)]
                encoder.compress_vec(data).unwrap()
            }
        }
    }

    /// Decompresses `data` into a buffer of `uncompressed_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decompress`] if the bytes are not valid
    /// snappy-compressed data.
    pub fn decompress(self, data: &[u8], uncompressed_len: usize) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Snappy => {
                let mut decoder = snap::raw::Decoder::new();
                let out = decoder
                    .decompress_vec(data)
                    .map_err(|_| crate::Error::Decompress)?;

                if out.len() != uncompressed_len {
                    return Err(crate::Error::Decompress);
                }

                Ok(out)
            }
        }
    }
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(match self {
            Self::None => 0,
            Self::Snappy => 1,
        })?;
        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Snappy),
            tag => Err(DecodeError::InvalidTag("CompressionType", tag)),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",
                Self::Snappy => "snappy",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn compression_roundtrip_snappy() -> crate::Result<()> {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = CompressionType::Snappy.compress(&data);
        let decompressed = CompressionType::Snappy.decompress(&compressed, data.len())?;
        assert_eq!(data, decompressed);
        Ok(())
    }

    #[test]
    fn compression_roundtrip_none() -> crate::Result<()> {
        let data = b"abc".to_vec();
        let compressed = CompressionType::None.compress(&data);
        let decompressed = CompressionType::None.decompress(&compressed, data.len())?;
        assert_eq!(data, decompressed);
        Ok(())
    }

    #[test]
    fn compression_tag_roundtrip() -> crate::Result<()> {
        for ty in [CompressionType::None, CompressionType::Snappy] {
            let bytes = ty.encode_into_vec();
            let decoded = CompressionType::decode_from(&mut Cursor::new(bytes))?;
            assert_eq!(ty, decoded);
        }
        Ok(())
    }
}
