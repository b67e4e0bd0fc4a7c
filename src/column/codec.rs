// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-field column codecs: one [`FieldCodec`] implementation per record
//! field, splitting its output between a *default* region (fixed-width
//! and varint data) and a *blob* region (variable-length data).
//!
//! Prefix-delta string compression is grounded on
//! `table/range_tombstone_encoder.rs`'s common-prefix scheme; every other
//! codec here is a direct, unshared encoding for its field category.

use varint_rs::{VarintReader, VarintWriter};

/// The decoded form of one aligned read, as handed to the column writers by
/// the archive write phase's record-decoding collaborator, and handed back
/// out by [`super::reader::FieldBlockReader`]; this is the core's
/// black-box record shape the rest of the column archive treats opaquely.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedFields {
    pub ref_id: i32,
    pub pos: i32,
    pub reverse: bool,
    pub name: Vec<u8>,
    pub mapq: u8,
    pub flag: u16,
    pub cigar: Vec<u32>,
    pub template_len: i32,
    /// Unpacked base values, one nibble (0..=15) per element.
    pub sequence: Vec<u8>,
    pub qualities: Vec<u8>,
    pub aux_tags: Vec<AuxTag>,
}

/// One auxiliary tag: a 2-byte name, a 1-byte type letter, and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxTag {
    pub name: [u8; 2],
    pub tag_type: u8,
    pub payload: Vec<u8>,
}

/// A per-field block codec: encodes one field's value into a block's
/// default/blob regions, and decodes or skips it back out.
///
/// Every codec resets its delta-encoding baseline at the start of each
/// block (`reset_block`), so blocks stay independently seekable -- the
/// reader never needs to replay an earlier block to reconstruct a later
/// one's delta state.
pub trait FieldCodec: Default {
    /// The field's decoded value type.
    type Value;

    /// Resets any delta-encoding baseline to its block-start default.
    fn reset_block(&mut self);

    /// Appends `value`'s encoding to `default`/`blob`.
    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, blob: &mut Vec<u8>);

    /// Consumes one value's encoding from the front of `default`/`blob`.
    fn decode(&mut self, default: &mut &[u8], blob: &mut &[u8]) -> Self::Value;

    /// Consumes one value's encoding without materializing it, for
    /// projection reads that don't need this field's payload.
    fn skip(&mut self, default: &mut &[u8], blob: &mut &[u8]);
}

fn read_u32v(buf: &mut &[u8]) -> u32 {
    #[allow(clippy::unwrap_used)]
    buf.read_u32_varint().unwrap()
}

fn read_i32v(buf: &mut &[u8]) -> i32 {
    #[allow(clippy::unwrap_used)]
    buf.read_i32_varint().unwrap()
}

fn take(buf: &mut &[u8], len: usize) -> Vec<u8> {
    let (head, tail) = buf.split_at(len.min(buf.len()));
    *buf = tail;
    head.to_vec()
}

fn skip_bytes(buf: &mut &[u8], len: usize) {
    let len = len.min(buf.len());
    *buf = &buf[len..];
}

/// Coordinate field: `ref_id` delta-encoded (signed varint, default
/// region), `pos` delta-encoded (signed varint, blob region).
#[derive(Default)]
pub struct CoordCodec {
    prev_ref: i32,
    prev_pos: i32,
}

impl FieldCodec for CoordCodec {
    type Value = (i32, i32);

    fn reset_block(&mut self) {
        self.prev_ref = 0;
        self.prev_pos = 0;
    }

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, blob: &mut Vec<u8>) {
        let (ref_id, pos) = *value;
        #[allow(clippy::unwrap_used)]
        default.write_i32_varint(ref_id - self.prev_ref).unwrap();
        #[allow(clippy::unwrap_used)]
        blob.write_i32_varint(pos - self.prev_pos).unwrap();
        self.prev_ref = ref_id;
        self.prev_pos = pos;
    }

    fn decode(&mut self, default: &mut &[u8], blob: &mut &[u8]) -> Self::Value {
        let ref_id = self.prev_ref + read_i32v(default);
        let pos = self.prev_pos + read_i32v(blob);
        self.prev_ref = ref_id;
        self.prev_pos = pos;
        (ref_id, pos)
    }

    fn skip(&mut self, default: &mut &[u8], blob: &mut &[u8]) {
        let _ = self.decode(default, blob);
    }
}

/// Small integer field (mapping quality): one byte, default region.
#[derive(Default)]
pub struct MapqCodec;

impl FieldCodec for MapqCodec {
    type Value = u8;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, _blob: &mut Vec<u8>) {
        default.push(*value);
    }

    fn decode(&mut self, default: &mut &[u8], _blob: &mut &[u8]) -> Self::Value {
        take(default, 1).first().copied().unwrap_or(0)
    }

    fn skip(&mut self, default: &mut &[u8], _blob: &mut &[u8]) {
        skip_bytes(default, 1);
    }
}

/// Medium integer field (SAM flag): two bytes little-endian, default region.
#[derive(Default)]
pub struct FlagCodec;

impl FieldCodec for FlagCodec {
    type Value = u16;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, _blob: &mut Vec<u8>) {
        default.extend_from_slice(&value.to_le_bytes());
    }

    fn decode(&mut self, default: &mut &[u8], _blob: &mut &[u8]) -> Self::Value {
        let bytes = take(default, 2);
        u16::from_le_bytes([bytes.first().copied().unwrap_or(0), bytes.get(1).copied().unwrap_or(0)])
    }

    fn skip(&mut self, default: &mut &[u8], _blob: &mut &[u8]) {
        skip_bytes(default, 2);
    }
}

/// Variable signed integer field (template length and similar single-varint
/// fields): signed varint, default region.
#[derive(Default)]
pub struct VarIntCodec;

impl FieldCodec for VarIntCodec {
    type Value = i32;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, _blob: &mut Vec<u8>) {
        #[allow(clippy::unwrap_used)]
        default.write_i32_varint(*value).unwrap();
    }

    fn decode(&mut self, default: &mut &[u8], _blob: &mut &[u8]) -> Self::Value {
        read_i32v(default)
    }

    fn skip(&mut self, default: &mut &[u8], _blob: &mut &[u8]) {
        let _ = read_i32v(default);
    }
}

/// Cigar operations: count-prefixed list of unsigned varints, default
/// region. Each element packs an operation length and a 4-bit op code the
/// same way an encoded cigar op normally does; this codec treats each
/// element as an opaque `u32` and leaves that packing to the caller.
#[derive(Default)]
pub struct CigarCodec;

impl FieldCodec for CigarCodec {
    type Value = Vec<u32>;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, _blob: &mut Vec<u8>) {
        #[allow(clippy::unwrap_used)]
        default.write_u32_varint(value.len() as u32).unwrap();
        for op in value {
            #[allow(clippy::unwrap_used)]
            default.write_u32_varint(*op).unwrap();
        }
    }

    fn decode(&mut self, default: &mut &[u8], _blob: &mut &[u8]) -> Self::Value {
        let count = read_u32v(default) as usize;
        (0..count).map(|_| read_u32v(default)).collect()
    }

    fn skip(&mut self, default: &mut &[u8], _blob: &mut &[u8]) {
        let count = read_u32v(default) as usize;
        for _ in 0..count {
            let _ = read_u32v(default);
        }
    }
}

/// Packed sequence: length (unsigned varint, default region) +
/// `ceil(length / 2)` packed 4-bit bases (blob region).
#[derive(Default)]
pub struct SeqCodec;

impl FieldCodec for SeqCodec {
    /// One nibble value (0..=15) per base, unpacked.
    type Value = Vec<u8>;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, blob: &mut Vec<u8>) {
        #[allow(clippy::unwrap_used)]
        default.write_u32_varint(value.len() as u32).unwrap();
        for pair in value.chunks(2) {
            let hi = pair[0] & 0x0F;
            let lo = pair.get(1).copied().unwrap_or(0) & 0x0F;
            blob.push((hi << 4) | lo);
        }
    }

    fn decode(&mut self, default: &mut &[u8], blob: &mut &[u8]) -> Self::Value {
        let len = read_u32v(default) as usize;
        let packed_len = len.div_ceil(2);
        let packed = take(blob, packed_len);

        let mut out = Vec::with_capacity(len);
        for byte in packed {
            out.push((byte >> 4) & 0x0F);
            if out.len() < len {
                out.push(byte & 0x0F);
            }
        }
        out
    }

    fn skip(&mut self, default: &mut &[u8], blob: &mut &[u8]) {
        let len = read_u32v(default) as usize;
        skip_bytes(blob, len.div_ceil(2));
    }
}

/// Base qualities: length (unsigned varint, default region) + raw bytes
/// (blob region).
#[derive(Default)]
pub struct QualCodec;

impl FieldCodec for QualCodec {
    type Value = Vec<u8>;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, blob: &mut Vec<u8>) {
        #[allow(clippy::unwrap_used)]
        default.write_u32_varint(value.len() as u32).unwrap();
        blob.extend_from_slice(value);
    }

    fn decode(&mut self, default: &mut &[u8], blob: &mut &[u8]) -> Self::Value {
        let len = read_u32v(default) as usize;
        take(blob, len)
    }

    fn skip(&mut self, default: &mut &[u8], blob: &mut &[u8]) {
        let len = read_u32v(default) as usize;
        skip_bytes(blob, len);
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// String with prefix redundancy (read name and similar tag values):
/// `prefix_len` + `delta_len` (both unsigned varint, default region),
/// `delta_bytes` (blob region). Decoding reconstructs by concatenating the
/// previous record's shared prefix with the new suffix.
#[derive(Default)]
pub struct NameCodec {
    prev: Vec<u8>,
}

impl FieldCodec for NameCodec {
    type Value = Vec<u8>;

    fn reset_block(&mut self) {
        self.prev.clear();
    }

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, blob: &mut Vec<u8>) {
        let prefix_len = common_prefix_len(&self.prev, value);
        let suffix = &value[prefix_len..];

        #[allow(clippy::unwrap_used)]
        default.write_u32_varint(prefix_len as u32).unwrap();
        #[allow(clippy::unwrap_used)]
        default.write_u32_varint(suffix.len() as u32).unwrap();
        blob.extend_from_slice(suffix);

        self.prev = value.clone();
    }

    fn decode(&mut self, default: &mut &[u8], blob: &mut &[u8]) -> Self::Value {
        let prefix_len = read_u32v(default) as usize;
        let suffix_len = read_u32v(default) as usize;
        let suffix = take(blob, suffix_len);

        let mut value = self.prev[..prefix_len.min(self.prev.len())].to_vec();
        value.extend_from_slice(&suffix);
        self.prev = value.clone();
        value
    }

    fn skip(&mut self, default: &mut &[u8], blob: &mut &[u8]) {
        let _ = self.decode(default, blob);
    }
}

/// Fixed on-disk payload length for a BAM-style auxiliary tag type letter,
/// or `None` for variable-length types (`Z`, `H`, `B`), whose length is
/// carried by an explicit varint prefix instead.
fn aux_fixed_len(tag_type: u8) -> Option<usize> {
    match tag_type {
        b'A' | b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

/// Auxiliary tag list: count (unsigned varint, default region), then per
/// tag a 3-byte name+type and -- for variable-length types -- an explicit
/// length prefix, all in the default region; every tag's payload bytes are
/// appended to the blob region.
#[derive(Default)]
pub struct AuxCodec;

impl FieldCodec for AuxCodec {
    type Value = Vec<AuxTag>;

    fn reset_block(&mut self) {}

    fn encode(&mut self, value: &Self::Value, default: &mut Vec<u8>, blob: &mut Vec<u8>) {
        #[allow(clippy::unwrap_used)]
        default.write_u32_varint(value.len() as u32).unwrap();
        for tag in value {
            default.extend_from_slice(&tag.name);
            default.push(tag.tag_type);
            if aux_fixed_len(tag.tag_type).is_none() {
                #[allow(clippy::unwrap_used)]
                default.write_u32_varint(tag.payload.len() as u32).unwrap();
            }
            blob.extend_from_slice(&tag.payload);
        }
    }

    fn decode(&mut self, default: &mut &[u8], blob: &mut &[u8]) -> Self::Value {
        let count = read_u32v(default) as usize;
        let mut tags = Vec::with_capacity(count);

        for _ in 0..count {
            let name_bytes = take(default, 2);
            let name = [name_bytes.first().copied().unwrap_or(0), name_bytes.get(1).copied().unwrap_or(0)];
            let tag_type = take(default, 1).first().copied().unwrap_or(0);

            let len = aux_fixed_len(tag_type).unwrap_or_else(|| read_u32v(default) as usize);
            let payload = take(blob, len);

            tags.push(AuxTag { name, tag_type, payload });
        }

        tags
    }

    fn skip(&mut self, default: &mut &[u8], blob: &mut &[u8]) {
        let count = read_u32v(default) as usize;
        for _ in 0..count {
            skip_bytes(default, 2);
            let tag_type = take(default, 1).first().copied().unwrap_or(0);
            let len = aux_fixed_len(tag_type).unwrap_or_else(|| read_u32v(default) as usize);
            skip_bytes(blob, len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn roundtrip<C: FieldCodec>(values: &[C::Value]) -> Vec<C::Value>
    where
        C::Value: Clone,
    {
        let mut writer = C::default();
        let mut default = Vec::new();
        let mut blob = Vec::new();
        for v in values {
            writer.encode(v, &mut default, &mut blob);
        }

        let mut reader = C::default();
        let mut default_slice: &[u8] = &default;
        let mut blob_slice: &[u8] = &blob;
        values.iter().map(|_| reader.decode(&mut default_slice, &mut blob_slice)).collect()
    }

    #[test]
    fn coord_codec_roundtrips_deltas() {
        let values = vec![(0, 10), (0, 20), (1, 5), (1, 5)];
        assert_eq!(roundtrip::<CoordCodec>(&values), values);
    }

    #[test]
    fn mapq_and_flag_roundtrip() {
        assert_eq!(roundtrip::<MapqCodec>(&[0, 60, 255]), vec![0, 60, 255]);
        assert_eq!(roundtrip::<FlagCodec>(&[0, 0x0010, 0xFFFF]), vec![0, 0x0010, 0xFFFF]);
    }

    #[test]
    fn varint_codec_roundtrips_negative_values() {
        assert_eq!(roundtrip::<VarIntCodec>(&[0, -150, 300, i32::MIN, i32::MAX]), vec![0, -150, 300, i32::MIN, i32::MAX]);
    }

    #[test]
    fn cigar_codec_roundtrips() {
        let values = vec![vec![(100 << 4) | 0], vec![(10 << 4) | 0, (5 << 4) | 1]];
        assert_eq!(roundtrip::<CigarCodec>(&values), values);
    }

    #[test]
    fn seq_codec_roundtrips_odd_and_even_lengths() {
        let values = vec![vec![1u8, 2, 3], vec![4u8, 5, 6, 7], vec![]];
        assert_eq!(roundtrip::<SeqCodec>(&values), values);
    }

    #[test]
    fn qual_codec_roundtrips() {
        let values = vec![vec![30u8, 31, 32], vec![]];
        assert_eq!(roundtrip::<QualCodec>(&values), values);
    }

    #[test]
    fn name_codec_exploits_shared_prefix() {
        let values = vec![b"read-001".to_vec(), b"read-002".to_vec(), b"other".to_vec()];
        assert_eq!(roundtrip::<NameCodec>(&values), values);
    }

    #[test]
    fn aux_codec_roundtrips_fixed_and_variable_types() {
        let values = vec![vec![
            AuxTag {
                name: *b"NM",
                tag_type: b'i',
                payload: 2i32.to_le_bytes().to_vec(),
            },
            AuxTag {
                name: *b"RG",
                tag_type: b'Z',
                payload: b"group-1\0".to_vec(),
            },
        ]];
        assert_eq!(roundtrip::<AuxCodec>(&values), values);
    }

    #[test]
    fn skip_advances_cursors_the_same_as_decode() {
        let values = vec![(0, 10), (2, 5)];
        let mut writer = CoordCodec::default();
        let mut default = Vec::new();
        let mut blob = Vec::new();
        for v in &values {
            writer.encode(v, &mut default, &mut blob);
        }

        let mut skipper = CoordCodec::default();
        let mut d: &[u8] = &default;
        let mut b: &[u8] = &blob;
        skipper.skip(&mut d, &mut b);
        assert!(!d.is_empty());

        let mut reader = CoordCodec::default();
        reader.skip(&mut d, &mut b);
        assert!(d.is_empty() && b.is_empty());
    }
}
