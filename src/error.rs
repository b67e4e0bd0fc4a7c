// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
};

/// Errors that can occur while sorting, merging, or reading aligned-read
/// shards and column archives.
///
/// Per the crate's error-handling design, *corruption* and *contract
/// violation* conditions are not represented here: those abort the process
/// with `panic!`, since continuing would silently produce wrong output
/// (see the module-level docs on [`crate::shard`] and [`crate::sorter`]).
/// This enum only carries transient, recoverable conditions.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Decompression failed
    Decompress,

    /// Invalid checksum value (expected, got)
    ChecksumMismatch {
        /// Checksum recorded in the block/trailer header.
        expected: Checksum,
        /// Checksum actually computed over the bytes read.
        got: Checksum,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReadSortError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Aborts the process because an on-disk structure violates an invariant
/// the reader cannot recover from (bad magic, truncated trailer, a
/// monotonicity violation crossing a block boundary, ...).
///
/// Corruption is programmer-visible and unrecoverable; the process aborts
/// with a diagnostic naming the offending file and offset.
#[track_caller]
pub(crate) fn corrupt(path: &std::path::Path, offset: u64, detail: &str) -> ! {
    panic!("corrupt file {}: at offset {offset}: {detail}", path.display());
}

/// Records the first error seen by any of a set of concurrent writers so
/// that a later `close()`/`finish()` call can surface it.
///
/// Guards shared mutable state (spill path lists, lock-poisoning) behind a
/// single mutex and treats the first failure as authoritative; later
/// failures are logged but do not replace it.
#[derive(Default)]
pub struct ErrorOnce(std::sync::Mutex<Option<std::sync::Arc<Error>>>);

impl ErrorOnce {
    /// Creates an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `err` if no error has been recorded yet.
    pub fn set_if_empty(&self, err: Error) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.0.lock().unwrap();
        if guard.is_none() {
            *guard = Some(std::sync::Arc::new(err));
        } else {
            log::warn!("secondary error suppressed: {err}");
        }
    }

    /// Returns the first recorded error, if any.
    #[must_use]
    pub fn take(&self) -> Option<std::sync::Arc<Error>> {
        #[allow(clippy::unwrap_used)]
        let guard = self.0.lock().unwrap();
        guard.clone()
    }

    /// `true` if an error has been recorded.
    #[must_use]
    pub fn is_set(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        self.0.lock().unwrap().is_some()
    }
}
