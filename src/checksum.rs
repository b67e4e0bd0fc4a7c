// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! 128-bit block/trailer checksums, computed with `xxhash-rust`'s xxh3.

use std::io::Write;

/// A 128-bit checksum over a block or trailer's byte content.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u128);

impl Checksum {
    /// Wraps a raw checksum value (e.g. read back from a file).
    #[must_use]
    pub fn from_raw(value: u128) -> Self {
        Self(value)
    }

    /// Returns the raw 128-bit integer.
    #[must_use]
    pub fn into_u128(self) -> u128 {
        self.0
    }

    /// Computes the checksum of a single byte slice directly.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = xxhash_rust::xxh3::Xxh3Default::new();
        hasher.update(bytes);
        Self(hasher.digest128())
    }

    pub(crate) fn check(&self, expected: Self) -> crate::Result<()> {
        if self.0 == expected.0 {
            Ok(())
        } else {
            Err(crate::Error::ChecksumMismatch {
                expected,
                got: *self,
            })
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A `Write` adapter that hashes every byte written through it, so a block
/// or trailer's checksum can be computed in the same pass that serializes
/// it.
pub struct ChecksummedWriter<W: Write> {
    inner: W,
    hasher: xxhash_rust::xxh3::Xxh3Default,
}

impl<W: Write> ChecksummedWriter<W> {
    /// Wraps `writer`, accumulating a running xxh3-128 checksum.
    pub fn new(writer: W) -> Self {
        Self {
            inner: writer,
            hasher: xxhash_rust::xxh3::Xxh3Default::new(),
        }
    }

    /// Returns the checksum of all bytes written so far.
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        Checksum::from_raw(self.hasher.digest128())
    }

    /// Unwraps the adapter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChecksummedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn checksum_stable_for_same_bytes() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_for_different_bytes() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello worle");
        assert_ne!(a, b);
    }

    #[test]
    fn checksummed_writer_matches_direct() -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut writer = ChecksummedWriter::new(&mut buf);
        writer.write_all(b"abcdefg")?;
        let streamed = writer.checksum();
        let direct = Checksum::of(b"abcdefg");
        assert_eq!(streamed, direct);
        Ok(())
    }
}
