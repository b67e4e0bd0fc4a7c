// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Assigns the per-`(ref, pos)` sequence number that turns a coordinate
//! into a column-archive [`Address`].

use crate::key::Address;

/// Assigns sequence numbers to a non-decreasing stream of `(ref_id, pos)`
/// pairs: `0` for the first record at a coordinate, incrementing for every
/// repeat, resetting back to `0` the moment the coordinate changes.
#[derive(Default)]
pub struct AddressGenerator {
    last: Option<(i32, i32)>,
    seq: u32,
}

impl AddressGenerator {
    /// Creates a fresh generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next address for `(ref_id, pos)`.
    ///
    /// # Panics
    ///
    /// Debug-asserts that `(ref_id, pos)` is non-decreasing relative to the
    /// previous call -- the generator assumes it is fed in coordinate
    /// order, as every caller in this crate guarantees.
    pub fn next(&mut self, ref_id: i32, pos: i32) -> Address {
        match self.last {
            Some(prev) if prev == (ref_id, pos) => {
                self.seq += 1;
            }
            Some(prev) => {
                debug_assert!(
                    prev <= (ref_id, pos),
                    "address generator fed out-of-order coordinates: {prev:?} then {:?}",
                    (ref_id, pos)
                );
                self.seq = 0;
            }
            None => {
                self.seq = 0;
            }
        }

        self.last = Some((ref_id, pos));
        Address::new(ref_id, pos, self.seq)
    }

    /// Resumes generation as if the last-assigned address was `addr`,
    /// used by [`super::reader`] when a seek lands mid-stream and needs to
    /// continue the sequence from a block's recorded start address.
    pub fn resume_from(&mut self, addr: Address) {
        self.last = Some((addr.ref_id, addr.pos));
        self.seq = addr.seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn assigns_zero_then_increments_on_repeat() {
        let mut gen = AddressGenerator::new();
        assert_eq!(gen.next(0, 10), Address::new(0, 10, 0));
        assert_eq!(gen.next(0, 10), Address::new(0, 10, 1));
        assert_eq!(gen.next(0, 10), Address::new(0, 10, 2));
    }

    #[test]
    fn resets_on_new_coordinate() {
        let mut gen = AddressGenerator::new();
        assert_eq!(gen.next(0, 10), Address::new(0, 10, 0));
        assert_eq!(gen.next(0, 10), Address::new(0, 10, 1));
        assert_eq!(gen.next(0, 20), Address::new(0, 20, 0));
    }

    #[test]
    fn resume_continues_sequence() {
        let mut gen = AddressGenerator::new();
        gen.resume_from(Address::new(1, 5, 3));
        assert_eq!(gen.next(1, 5), Address::new(1, 5, 4));
        assert_eq!(gen.next(1, 6), Address::new(1, 6, 0));
    }
}
