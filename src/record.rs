// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The aligned-read record model consumed by [`crate::sorter::Sorter`], and
//! the `(key, payload)` pairs ([`SortEntry`]) persisted to shard files.
//!
//! Parsing/formatting of the real text/binary record formats is out of
//! scope here: the core only ever sees an already-decoded
//! [`Record`] plus a collaborator-provided [`PayloadEncoder`] that turns it
//! into an opaque, length-prefixed byte blob.

use crate::key::CoordKey;
use byteorder::{LittleEndian, WriteBytesExt};

/// An aligned read with just enough structure for sort ordering; its
/// variable-length fields (name, cigar, sequence, ...) are out of scope for
/// the core and are carried only inside the opaque payload a
/// [`PayloadEncoder`] produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Reference sequence id; `None` for unmapped.
    pub ref_id: Option<i32>,

    /// Alignment position; meaningless when `ref_id` is `None`.
    pub position: i32,

    /// Reverse-strand flag; meaningless when `ref_id` is `None`.
    pub reverse: bool,

    /// Opaque per-record payload (e.g. name, cigar, sequence, aux tags) as
    /// produced by the upstream aligner/parser. Not interpreted by the
    /// sorter or shard codec.
    pub payload: Vec<u8>,
}

impl Record {
    /// Builds a mapped record.
    ///
    /// # Panics
    ///
    /// Panics if `ref_id < 0` or `position < 0` -- mapped records always
    /// satisfy `ref >= 0`.
    #[must_use]
    pub fn mapped(ref_id: i32, position: i32, reverse: bool, payload: Vec<u8>) -> Self {
        assert!(ref_id >= 0, "mapped record must have ref_id >= 0, got {ref_id}");
        assert!(position >= 0, "mapped record must have position >= 0, got {position}");
        Self {
            ref_id: Some(ref_id),
            position,
            reverse,
            payload,
        }
    }

    /// Builds an unmapped record.
    #[must_use]
    pub fn unmapped(payload: Vec<u8>) -> Self {
        Self {
            ref_id: None,
            position: -1,
            reverse: false,
            payload,
        }
    }

    /// The coordinate key this record sorts by.
    #[must_use]
    pub fn key(&self) -> CoordKey {
        match self.ref_id {
            Some(r) => CoordKey::mapped(r, self.position, self.reverse),
            None => CoordKey::unmapped(),
        }
    }

    /// Approximate in-memory footprint, used by the sorter to decide when a
    /// batch is full.
    #[must_use]
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.len()
    }
}

/// A deterministic function that serializes a [`Record`]'s payload for
/// on-disk storage.
///
/// The encoder is a collaborator-provided black box; its
/// output must be prefixed with a 4-byte little-endian length (see
/// [`with_length_prefix`]) so the container writer can later strip that
/// prefix when concatenating merged payloads.
pub trait PayloadEncoder: Fn(&Record) -> Vec<u8> {}
impl<F: Fn(&Record) -> Vec<u8>> PayloadEncoder for F {}

/// Prefixes `bytes` with its own 4-byte little-endian length, matching the
/// format [`PayloadEncoder`] implementations are expected to produce.
#[must_use]
pub fn with_length_prefix(bytes: &[u8]) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    let len = bytes.len() as u32;
    let mut out = Vec::with_capacity(4 + bytes.len());
    #[allow(clippy::unwrap_used)]
    out.write_u32::<LittleEndian>(len).unwrap();
    out.extend_from_slice(bytes);
    out
}

/// Strips a 4-byte little-endian length prefix, returning the prefix length
/// and the remaining record bytes.
///
/// # Panics
///
/// Panics if `bytes` is shorter than 4 bytes, or the encoded length does not
/// match the remainder -- this indicates the payload was not produced by a
/// conforming [`PayloadEncoder`], a contract violation.
#[must_use]
pub fn strip_length_prefix(bytes: &[u8]) -> &[u8] {
    assert!(bytes.len() >= 4, "payload too short to carry a length prefix");
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    assert_eq!(
        len,
        rest.len(),
        "payload length prefix {len} does not match remaining {} bytes",
        rest.len()
    );
    rest
}

/// A `(key, payload_bytes)` pair -- the unit persisted to, and read back
/// from, shard files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortEntry {
    /// The coordinate key.
    pub key: CoordKey,

    /// The length-prefixed, encoder-produced payload bytes.
    pub payload: Vec<u8>,
}

impl SortEntry {
    /// Builds a sort entry from a record and its encoder.
    pub fn from_record<E: PayloadEncoder>(record: &Record, encode: E) -> Self {
        Self {
            key: record.key(),
            payload: encode(record),
        }
    }

    /// Approximate in-memory footprint.
    #[must_use]
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn length_prefix_roundtrip() {
        let record = b"some-encoded-record".to_vec();
        let prefixed = with_length_prefix(&record);
        assert_eq!(prefixed.len(), 4 + record.len());
        assert_eq!(strip_length_prefix(&prefixed), &record[..]);
    }

    #[test]
    fn record_key_matches_coord_key_mapped() {
        let rec = Record::mapped(2, 99, true, vec![1, 2, 3]);
        assert_eq!(rec.key(), CoordKey::mapped(2, 99, true));
    }

    #[test]
    fn record_key_unmapped_is_sentinel() {
        let rec = Record::unmapped(vec![]);
        assert_eq!(rec.key(), CoordKey::UNMAPPED);
    }

    #[test]
    #[should_panic(expected = "length prefix")]
    fn strip_length_prefix_rejects_mismatch() {
        let mut bad = with_length_prefix(b"abc");
        bad.push(0xFF); // now claims len=3 but carries 4 bytes
        strip_length_prefix(&bad);
    }
}
