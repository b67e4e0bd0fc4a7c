// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shard file reader: streams parsed `(key, payload)` records out of a
//! recordio-framed shard file, optionally bounded to a byte range, with
//! blocks decompressed on a background thread into a bounded channel.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use crossbeam_channel::{Receiver, Sender};

use super::{parse_block, BlockHeader, BlockIndexEntry, ShardTrailer, FOOTER_LEN, FOOTER_MAGIC};
use crate::checksum::Checksum;
use crate::coding::Decode;
use crate::key::CoordKey;

/// Options accepted by [`ShardReader::open`].
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    /// Restricts reading to blocks whose file offset falls in
    /// `[start_offset, limit_offset)`. `None` reads every block.
    pub byte_range: Option<(u64, u64)>,

    /// Depth of the bounded channel the background decompression thread
    /// feeds. Defaults to 4 when left at `0`.
    pub prefetch_depth: usize,
}

enum WorkerMsg {
    Block(Vec<u8>),
}

/// Streams records out of a shard file written by [`super::ShardWriter`].
pub struct ShardReader {
    path: PathBuf,
    header_bytes: Vec<u8>,
    total_record_count: u64,

    rx: Receiver<crate::Result<WorkerMsg>>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,

    current_entries: Vec<(CoordKey, Vec<u8>)>,
    current_index: usize,
    last_key: Option<CoordKey>,
    current: Option<(CoordKey, Vec<u8>)>,
}

/// Reads just a shard file's trailer (footer + trailer, checksum-verified),
/// without opening a background decompression thread or selecting a block
/// range. Used by the column-archive planner to collect every input
/// shard's block index cheaply.
///
/// # Panics
///
/// Panics (via [`crate::error::corrupt`]) on a missing or corrupt
/// footer/trailer.
pub fn read_trailer(path: impl AsRef<Path>) -> crate::Result<ShardTrailer> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)?;
    let file_len = file.seek(SeekFrom::End(0))?;

    if file_len < FOOTER_LEN {
        crate::error::corrupt(path, file_len, "shard file is shorter than a footer");
    }

    file.seek(SeekFrom::Start(file_len - FOOTER_LEN))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if magic != FOOTER_MAGIC {
        crate::error::corrupt(path, file_len - FOOTER_LEN, "bad shard footer magic");
    }
    let trailer_offset = file.read_u64::<BigEndian>()?;
    let trailer_len = file.read_u32::<BigEndian>()? as usize;
    let trailer_checksum = Checksum::from_raw(file.read_u128::<BigEndian>()?);

    file.seek(SeekFrom::Start(trailer_offset))?;
    let mut trailer_bytes = vec![0u8; trailer_len];
    file.read_exact(&mut trailer_bytes)?;

    if Checksum::of(&trailer_bytes) != trailer_checksum {
        crate::error::corrupt(path, trailer_offset, "shard trailer failed its checksum");
    }

    let trailer = ShardTrailer::decode_from(&mut std::io::Cursor::new(trailer_bytes))
        .unwrap_or_else(|e| crate::error::corrupt(path, trailer_offset, &format!("malformed shard trailer: {e}")));

    Ok(trailer)
}

impl ShardReader {
    /// Opens `path`, reading its trailer and optionally restricting the
    /// stream to a byte range.
    ///
    /// # Panics
    ///
    /// Panics (via [`crate::error::corrupt`]) if the file's footer or
    /// trailer is missing or fails its checksum -- this is a
    /// programmer-visible corruption condition, not a recoverable error.
    pub fn open(path: impl Into<PathBuf>, opts: ReaderOptions) -> crate::Result<Self> {
        let path = path.into();
        let mut file = std::fs::File::open(&path)?;
        let file_len = file.seek(SeekFrom::End(0))?;

        if file_len < FOOTER_LEN {
            crate::error::corrupt(&path, file_len, "shard file is shorter than a footer");
        }

        file.seek(SeekFrom::Start(file_len - FOOTER_LEN))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != FOOTER_MAGIC {
            crate::error::corrupt(&path, file_len - FOOTER_LEN, "bad shard footer magic");
        }
        let trailer_offset = file.read_u64::<BigEndian>()?;
        let trailer_len = file.read_u32::<BigEndian>()? as usize;
        let trailer_checksum = Checksum::from_raw(file.read_u128::<BigEndian>()?);

        file.seek(SeekFrom::Start(trailer_offset))?;
        let mut trailer_bytes = vec![0u8; trailer_len];
        file.read_exact(&mut trailer_bytes)?;

        if Checksum::of(&trailer_bytes) != trailer_checksum {
            crate::error::corrupt(&path, trailer_offset, "shard trailer failed its checksum");
        }

        let trailer = ShardTrailer::decode_from(&mut std::io::Cursor::new(trailer_bytes))
            .unwrap_or_else(|e| crate::error::corrupt(&path, trailer_offset, &format!("malformed shard trailer: {e}")));

        let (first, last) = match opts.byte_range {
            Some((start_offset, limit_offset)) => {
                let first = trailer
                    .blocks
                    .iter()
                    .position(|b| b.file_offset >= start_offset)
                    .unwrap_or(trailer.blocks.len());
                let last = trailer
                    .blocks
                    .iter()
                    .position(|b| b.file_offset >= limit_offset)
                    .unwrap_or(trailer.blocks.len());
                (first, last.max(first))
            }
            None => (0, trailer.blocks.len()),
        };
        let selected: Vec<BlockIndexEntry> = trailer.blocks[first..last].to_vec();

        let depth = if opts.prefetch_depth == 0 { 4 } else { opts.prefetch_depth };
        let (tx, rx) = crossbeam_channel::bounded(depth);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = if selected.is_empty() {
            drop(tx);
            None
        } else {
            let worker_path = path.clone();
            let worker_stop = Arc::clone(&stop);
            Some(std::thread::spawn(move || {
                decode_blocks(&worker_path, &selected, &tx, &worker_stop);
            }))
        };

        Ok(Self {
            path,
            header_bytes: trailer.header_bytes,
            total_record_count: trailer.total_record_count,
            rx,
            stop,
            worker,
            current_entries: Vec::new(),
            current_index: 0,
            last_key: None,
            current: None,
        })
    }

    /// Advances to the next record. Returns `Ok(false)` at end-of-stream.
    ///
    /// # Panics
    ///
    /// Panics if keys are not non-decreasing across the whole stream,
    /// including across a block boundary.
    pub fn scan(&mut self) -> crate::Result<bool> {
        loop {
            if self.current_index < self.current_entries.len() {
                let (key, payload) = self.current_entries[self.current_index].clone();
                if let Some(last) = self.last_key {
                    if key < last {
                        crate::error::corrupt(&self.path, 0, "shard stream key decreased");
                    }
                }
                self.last_key = Some(key);
                self.current = Some((key, payload));
                self.current_index += 1;
                return Ok(true);
            }

            match self.rx.recv() {
                Ok(Ok(WorkerMsg::Block(buf))) => {
                    self.current_entries = parse_block(&buf);
                    self.current_index = 0;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    self.current = None;
                    return Ok(false);
                }
            }
        }
    }

    /// The current `(key, payload)` pair, valid after `scan()` returns
    /// `Ok(true)`.
    #[must_use]
    pub fn current(&self) -> Option<&(CoordKey, Vec<u8>)> {
        self.current.as_ref()
    }

    /// The encoded source header bytes carried in this shard's trailer.
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.header_bytes
    }

    /// Total record count recorded in the trailer.
    #[must_use]
    pub fn total_record_count(&self) -> u64 {
        self.total_record_count
    }

    /// Signals the background decoding thread to stop and joins it. Must be
    /// called on early termination.
    pub fn drain(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        while self.rx.recv().is_ok() {}
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::warn!("shard reader background thread panicked for {}", self.path.display());
            }
        }
    }
}

impl Drop for ShardReader {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.drain();
        }
    }
}

fn decode_blocks(path: &Path, blocks: &[BlockIndexEntry], tx: &Sender<crate::Result<WorkerMsg>>, stop: &AtomicBool) {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            let _ = tx.send(Err(e.into()));
            return;
        }
    };

    if let Err(e) = file.seek(SeekFrom::Start(blocks[0].file_offset)) {
        let _ = tx.send(Err(e.into()));
        return;
    }

    for _ in blocks {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        let header = match BlockHeader::decode_from(&mut file) {
            Ok(h) => h,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return;
            }
        };

        let mut compressed = vec![0u8; header.compressed_len as usize];
        if let Err(e) = file.read_exact(&mut compressed) {
            let _ = tx.send(Err(e.into()));
            return;
        }

        if Checksum::of(&compressed).into_u128() != header.checksum.into_u128() {
            crate::error::corrupt(path, 0, "shard block failed its checksum");
        }

        match header.compression.decompress(&compressed, header.uncompressed_len as usize) {
            Ok(buf) => {
                if tx.send(Ok(WorkerMsg::Block(buf))).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionType;
    use crate::pool::Pool;
    use crate::shard::ShardWriter;
    use std::sync::Arc;
    use test_log::test;

    fn write_shard(path: &Path, records: &[(CoordKey, &[u8])]) -> crate::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = ShardWriter::new(file, b"hdr".to_vec(), CompressionType::Snappy, Arc::new(Pool::new(4)));
        for (key, payload) in records {
            writer.add(*key, payload)?;
        }
        writer.finish()?;
        Ok(())
    }

    #[test]
    fn reader_streams_records_in_order() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shard-0");
        write_shard(
            &path,
            &[
                (CoordKey::mapped(0, 10, false), b"a"),
                (CoordKey::mapped(0, 20, false), b"bb"),
                (CoordKey::mapped(1, 0, false), b"ccc"),
            ],
        )?;

        let mut reader = ShardReader::open(&path, ReaderOptions::default())?;
        assert_eq!(reader.header(), b"hdr");
        assert_eq!(reader.total_record_count(), 3);

        let mut seen = Vec::new();
        while reader.scan()? {
            seen.push(reader.current().unwrap().clone());
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, CoordKey::mapped(0, 10, false));
        assert_eq!(seen[2].1, b"ccc");
        Ok(())
    }

    #[test]
    fn reader_handles_empty_shard() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        write_shard(&path, &[])?;

        let mut reader = ShardReader::open(&path, ReaderOptions::default())?;
        assert_eq!(reader.total_record_count(), 0);
        assert!(!reader.scan()?);
        Ok(())
    }

    #[test]
    fn reader_drain_stops_background_thread() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shard-1");
        let payload = vec![0u8; 4096];
        let records: Vec<(CoordKey, &[u8])> = (0..400).map(|i| (CoordKey::mapped(0, i, false), payload.as_slice())).collect();
        write_shard(&path, &records)?;

        let mut reader = ShardReader::open(&path, ReaderOptions::default())?;
        assert!(reader.scan()?);
        reader.drain();
        Ok(())
    }
}
