// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The container writer: concatenates the records of a multiway merge into
//! the standard aligned-read container format.
//!
//! The block-gzip transport itself is out of scope here: this writer only
//! ever sees a collaborator-provided `Write` sink, to which it writes the
//! merged header once followed by each merged payload with its 4-byte
//! length prefix stripped.

use std::io::Write;

use crate::record;

/// Writes a merged header followed by a stream of merged payloads to a
/// block-gzip (or any other) sink.
///
/// A thin passthrough: the container writer produces no records of its
/// own, it only strips the embedded length prefix each
/// [`crate::record::PayloadEncoder`] output carries.
pub struct ContainerWriter<W: Write> {
    sink: W,
    record_count: u64,
}

impl<W: Write> ContainerWriter<W> {
    /// Opens a container writer over `sink`, immediately writing the
    /// merged header bytes.
    pub fn new(mut sink: W, merged_header: &[u8]) -> crate::Result<Self> {
        sink.write_all(merged_header)?;
        Ok(Self { sink, record_count: 0 })
    }

    /// Writes one merged record's payload, stripping its embedded 4-byte
    /// length prefix first.
    ///
    /// # Panics
    ///
    /// Panics if `payload` is not itself a conformingly length-prefixed
    /// blob -- via [`crate::record::strip_length_prefix`].
    pub fn write_record(&mut self, payload: &[u8]) -> crate::Result<()> {
        let bytes = record::strip_length_prefix(payload);
        self.sink.write_all(bytes)?;
        self.record_count += 1;
        Ok(())
    }

    /// Number of records written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.record_count
    }

    /// `true` if no records have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Flushes and returns the underlying sink.
    pub fn finish(mut self) -> crate::Result<W> {
        self.sink.flush()?;
        log::debug!("container writer finished: {} records", self.record_count);
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::with_length_prefix;
    use test_log::test;

    #[test]
    fn writes_header_then_stripped_payloads() -> crate::Result<()> {
        let mut writer = ContainerWriter::new(Vec::new(), b"HEADER")?;
        writer.write_record(&with_length_prefix(b"rec-a"))?;
        writer.write_record(&with_length_prefix(b"rec-b"))?;
        assert_eq!(writer.len(), 2);

        let bytes = writer.finish()?;
        assert_eq!(bytes, b"HEADERrec-arec-b");
        Ok(())
    }

    #[test]
    fn empty_container_writes_only_header() -> crate::Result<()> {
        let writer = ContainerWriter::new(Vec::new(), b"HDR")?;
        assert!(writer.is_empty());
        let bytes = writer.finish()?;
        assert_eq!(bytes, b"HDR");
        Ok(())
    }
}
