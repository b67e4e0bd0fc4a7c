// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The 64-bit genomic coordinate key that defines shard/merge sort order,
//! plus the column-archive [`Address`] that extends it with a
//! per-coordinate sequence number.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// A totally-ordered 64-bit packed sort key over
/// `(reference id, position, reverse-strand flag)`.
///
/// Bit layout, most significant to least significant:
/// - bits 63..33 (31 bits): reference id
/// - bits 32..1  (32 bits): position
/// - bit 0:                 reverse-strand flag
///
/// Comparison is unsigned numeric comparison on the 64-bit value -- this is
/// only sound because mapped reads always have `ref_id >= 0` and unmapped
/// reads use the fixed [`CoordKey::UNMAPPED`] sentinel rather than going
/// through the bit-packing formula with a negative reference id.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct CoordKey(u64);

impl CoordKey {
    /// Reserved key for unmapped records: sorts after every mapped key, but
    /// strictly before [`Self::INFINITY`].
    pub const UNMAPPED: Self = Self(0x7FFF_FFFF_FFFF_FFFE);

    /// Sentinel strictly greater than every valid key; used as a right-open
    /// range limit.
    pub const INFINITY: Self = Self(0xFFFF_FFFF_FFFF_FFFE);

    /// A key guaranteed to compare less than or equal to every valid key;
    /// used as a left-closed range origin.
    pub const MIN: Self = Self(0);

    /// Packs a mapped record's `(ref_id, position, reverse)` into a key.
    ///
    /// # Panics
    ///
    /// Panics if `ref_id` or `position` is negative, or `ref_id` does not
    /// fit in 31 bits -- mapped records always satisfy `ref >= 0`; a caller
    /// violating this is a contract violation, not a recoverable error.
    #[must_use]
    pub fn mapped(ref_id: i32, position: i32, reverse: bool) -> Self {
        assert!(ref_id >= 0, "mapped record must have ref_id >= 0, got {ref_id}");
        assert!(
            ref_id < (1 << 31),
            "ref_id {ref_id} does not fit in the 31-bit coordinate key field"
        );
        assert!(position >= 0, "mapped record must have position >= 0, got {position}");

        let ref_bits = u64::from(ref_id as u32);
        let pos_bits = u64::from(position as u32);
        let strand_bit = u64::from(reverse);

        Self((ref_bits << 33) | (pos_bits << 1) | strand_bit)
    }

    /// The key for an unmapped record.
    #[must_use]
    pub fn unmapped() -> Self {
        Self::UNMAPPED
    }

    /// Wraps a raw packed value (e.g. read back from a shard file).
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw packed 64-bit value.
    #[must_use]
    pub fn into_raw(self) -> u64 {
        self.0
    }

    /// Unpacks `(ref_id, position, reverse)` for a key that was produced by
    /// [`Self::mapped`]. Meaningless for [`Self::UNMAPPED`]/[`Self::INFINITY`].
    #[must_use]
    pub fn unpack(self) -> (i32, i32, bool) {
        let ref_bits = (self.0 >> 33) & 0x7FFF_FFFF;
        let pos_bits = (self.0 >> 1) & 0xFFFF_FFFF;
        let strand_bit = self.0 & 1;

        #[allow(clippy::cast_possible_wrap)]
        (ref_bits as i32, pos_bits as u32 as i32, strand_bit != 0)
    }

    /// Strips the reverse-strand bit, so shard-boundary candidates are
    /// address-level, not strand-level.
    #[must_use]
    pub fn with_strand_cleared(self) -> Self {
        Self(self.0 & !1)
    }

    /// `true` for the dedicated unmapped sentinel.
    #[must_use]
    pub fn is_unmapped(self) -> bool {
        self == Self::UNMAPPED
    }
}

impl std::fmt::Debug for CoordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::UNMAPPED {
            write!(f, "CoordKey(UNMAPPED)")
        } else if *self == Self::INFINITY {
            write!(f, "CoordKey(INFINITY)")
        } else {
            let (r, p, s) = self.unpack();
            write!(f, "CoordKey(ref={r}, pos={p}, reverse={s})")
        }
    }
}

impl Encode for CoordKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.0)?;
        Ok(())
    }
}

impl Decode for CoordKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self(reader.read_u64::<BigEndian>()?))
    }
}

/// A column-archive address: a coordinate extended with a per-coordinate
/// sequence number, used to disambiguate records sharing `(ref, pos)`.
/// Ordered lexicographically.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, Debug)]
pub struct Address {
    /// Reference id component.
    pub ref_id: i32,
    /// Position component.
    pub pos: i32,
    /// Per-`(ref, pos)` sequence number assigned at write time.
    pub seq: u32,
}

impl Address {
    /// Builds an address from `(ref, pos)` with sequence number 0.
    #[must_use]
    pub fn new(ref_id: i32, pos: i32, seq: u32) -> Self {
        Self { ref_id, pos, seq }
    }

    /// The coordinate key for this address's `(ref, pos)`, ignoring `seq`
    /// (addresses within one block-start-key group share a coordinate key).
    #[must_use]
    pub fn coord_key(self, reverse: bool) -> CoordKey {
        if self.ref_id < 0 {
            CoordKey::UNMAPPED
        } else {
            CoordKey::mapped(self.ref_id, self.pos, reverse)
        }
    }
}

/// Sentinel reference id for "past end of addressable space".
pub const INFINITY_REF: i32 = -1;

/// Sentinel reference id meaning "unmapped".
pub const UNMAPPED_REF: i32 = -1;

/// Sentinel reference id that never appears in data.
pub const INVALID_REF: i32 = -2;

/// Sentinel position meaning "past end of addressable space".
pub const INFINITY_POS: i32 = i32::MAX;

/// Sentinel position that never appears in data.
pub const INVALID_POS: i32 = -2;
