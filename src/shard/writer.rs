// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shard file writer: packs non-decreasing `(key, payload)` pairs into
//! fixed-size, optionally snappy-compressed blocks and marshals the
//! trailer on `finish()`.

use std::io::Write;
use std::sync::Arc;

use super::{pack_record, BlockHeader, BlockIndexEntry, ShardTrailer, BLOCK_SIZE_LIMIT, RECORD_HEADER_LEN};
use crate::checksum::Checksum;
use crate::coding::Encode;
use crate::compression::CompressionType;
use crate::key::CoordKey;
use crate::pool::Pool;

/// Writes a recordio-framed shard file to any [`Write`] sink.
///
/// # States
///
/// `add` may be called any number of times, interleaved with block flushes
/// the writer performs transparently; once `finish` is called the writer is
/// consumed. There is no way to add a record after `finish`, since it takes
/// `self` by value -- the `{open, has-current-block, finishing, closed}`
/// state machine collapses to Rust's ownership model.
pub struct ShardWriter<W: Write> {
    sink: W,
    pool: Arc<Pool>,
    compression: CompressionType,
    header_bytes: Vec<u8>,

    current_block: Vec<u8>,
    current_block_start_key: Option<CoordKey>,
    current_block_file_offset: u64,
    current_block_record_count: u32,

    last_key_added: Option<CoordKey>,
    file_offset: u64,
    blocks: Vec<BlockIndexEntry>,
    total_record_count: u64,
}

impl<W: Write> ShardWriter<W> {
    /// Opens a new shard writer over `sink`.
    pub fn new(sink: W, header_bytes: Vec<u8>, compression: CompressionType, pool: Arc<Pool>) -> Self {
        let current_block = pool.get();
        Self {
            sink,
            pool,
            compression,
            header_bytes,
            current_block,
            current_block_start_key: None,
            current_block_file_offset: 0,
            current_block_record_count: 0,
            last_key_added: None,
            file_offset: 0,
            blocks: Vec::new(),
            total_record_count: 0,
        }
    }

    /// Appends a `(key, payload)` pair to the current block.
    ///
    /// # Panics
    ///
    /// Panics if `key` is strictly less than the previously added key --
    /// out-of-order `add` is a contract violation, not a recoverable
    /// error.
    pub fn add(&mut self, key: CoordKey, payload: &[u8]) -> crate::Result<()> {
        if let Some(last) = self.last_key_added {
            assert!(
                key >= last,
                "shard writer: key {key:?} added out of order (previous key was {last:?})"
            );
        }

        let needed = RECORD_HEADER_LEN + payload.len();
        if self.current_block.len() + needed > BLOCK_SIZE_LIMIT {
            let remaining = BLOCK_SIZE_LIMIT.saturating_sub(self.current_block.len());
            if remaining >= RECORD_HEADER_LEN {
                self.current_block
                    .extend_from_slice(&CoordKey::INFINITY.into_raw().to_le_bytes());
            }
            self.flush_current_block()?;
        }

        if self.current_block_record_count == 0 {
            self.current_block_start_key = Some(key);
            self.current_block_file_offset = self.file_offset;
        }

        pack_record(&mut self.current_block, key, payload);
        self.current_block_record_count += 1;
        self.total_record_count += 1;
        self.last_key_added = Some(key);

        if self.current_block.len() >= BLOCK_SIZE_LIMIT {
            self.flush_current_block()?;
        }

        Ok(())
    }

    fn flush_current_block(&mut self) -> crate::Result<()> {
        if self.current_block_record_count == 0 {
            return Ok(());
        }

        let uncompressed = std::mem::replace(&mut self.current_block, self.pool.get());
        let compressed = self.compression.compress(&uncompressed);
        let checksum = Checksum::of(&compressed);

        #[allow(clippy::cast_possible_truncation)]
        let header = BlockHeader {
            compression: self.compression,
            checksum,
            compressed_len: compressed.len() as u32,
            uncompressed_len: uncompressed.len() as u32,
        };
        let header_bytes = header.encode_into_vec();

        self.sink.write_all(&header_bytes)?;
        self.sink.write_all(&compressed)?;

        #[allow(clippy::unwrap_used)]
        self.blocks.push(BlockIndexEntry {
            start_key: self.current_block_start_key.unwrap(),
            file_offset: self.current_block_file_offset,
            record_count: self.current_block_record_count,
        });

        self.file_offset += (header_bytes.len() + compressed.len()) as u64;
        self.pool.put(uncompressed);
        self.current_block_record_count = 0;
        self.current_block_start_key = None;

        Ok(())
    }

    /// Flushes the pending block (if any), marshals and writes the trailer,
    /// and returns the underlying sink.
    pub fn finish(mut self) -> crate::Result<W> {
        self.flush_current_block()?;

        let trailer = ShardTrailer {
            compression: self.compression,
            header_bytes: self.header_bytes,
            total_record_count: self.total_record_count,
            blocks: self.blocks,
        };
        let trailer_bytes = trailer.encode_into_vec();
        let trailer_offset = self.file_offset;
        let trailer_checksum = Checksum::of(&trailer_bytes);

        self.sink.write_all(&trailer_bytes)?;

        self.sink.write_all(&super::FOOTER_MAGIC)?;
        {
            use byteorder::{BigEndian, WriteBytesExt};
            self.sink.write_u64::<BigEndian>(trailer_offset)?;
            #[allow(clippy::cast_possible_truncation)]
            self.sink.write_u32::<BigEndian>(trailer_bytes.len() as u32)?;
            self.sink.write_u128::<BigEndian>(trailer_checksum.into_u128())?;
        }
        self.sink.flush()?;

        log::debug!(
            "shard writer finished: {} records across {} blocks",
            trailer.total_record_count,
            trailer.blocks.len()
        );

        Ok(self.sink)
    }

    /// Total records added so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.total_record_count
    }

    /// `true` if no records have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_record_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    fn new_writer() -> ShardWriter<Cursor<Vec<u8>>> {
        ShardWriter::new(
            Cursor::new(Vec::new()),
            b"header".to_vec(),
            CompressionType::Snappy,
            Arc::new(Pool::new(4)),
        )
    }

    #[test]
    fn writer_flushes_and_finishes() -> crate::Result<()> {
        let mut writer = new_writer();
        writer.add(CoordKey::mapped(0, 10, false), b"a")?;
        writer.add(CoordKey::mapped(0, 20, false), b"bb")?;
        assert_eq!(writer.len(), 2);

        let sink = writer.finish()?;
        assert!(!sink.into_inner().is_empty());
        Ok(())
    }

    #[test]
    fn empty_writer_finishes_with_zero_blocks() -> crate::Result<()> {
        let writer = new_writer();
        assert!(writer.is_empty());
        writer.finish()?;
        Ok(())
    }

    #[test]
    #[should_panic(expected = "added out of order")]
    fn writer_panics_on_out_of_order_key() {
        let mut writer = new_writer();
        writer.add(CoordKey::mapped(0, 20, false), b"a").unwrap();
        writer.add(CoordKey::mapped(0, 10, false), b"b").unwrap();
    }

    #[test]
    fn writer_splits_into_multiple_blocks_past_size_limit() -> crate::Result<()> {
        let mut writer = new_writer();
        let payload = vec![0u8; 4096];
        for pos in 0..300 {
            writer.add(CoordKey::mapped(0, pos, false), &payload)?;
        }
        writer.finish()?;
        Ok(())
    }
}
