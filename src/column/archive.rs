// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The column archive write phase: a pool of workers, one per planned
//! output shard range, each merging every input shard's range-bounded
//! sub-reader and dispatching decoded record fields to one
//! [`FieldBlockWriter`] per field.
//!
//! Grounded on `compaction/mod.rs`'s "bounded work queue of worker pool
//! over OS threads, one job per output segment" shape.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::column::address::AddressGenerator;
use crate::column::codec::{AlignedFields, AuxCodec, CigarCodec, CoordCodec, FlagCodec, MapqCodec, NameCodec, QualCodec, SeqCodec, VarIntCodec};
use crate::column::planner::ShardBoundsPlanner;
use crate::column::writer::FieldBlockWriter;
use crate::compression::CompressionType;
use crate::config::PlannerOptions;
use crate::error::ErrorOnce;
use crate::key::{Address, CoordKey};
use crate::merge_tree::MergeTree;
use crate::pool::Pool;
use crate::shard::{ReaderOptions, ShardReader};

/// Every per-field filename suffix this crate writes, in a fixed order.
const FIELD_SUFFIXES: [&str; 9] = ["coord", "mapq", "flag", "template_len", "cigar", "seq", "qual", "name", "aux"];

/// The collaborator that turns one merged shard payload back into
/// structured fields: record parsing itself is out of scope here, so this
/// is the archive write phase's equivalent of
/// [`crate::record::PayloadEncoder`] run in reverse.
pub trait FieldDecoder: Fn(&[u8]) -> AlignedFields + Send + Sync {}
impl<F: Fn(&[u8]) -> AlignedFields + Send + Sync> FieldDecoder for F {}

/// The collaborator that deletes a stale archive file.
pub trait FileRemover: Fn(&Path) -> crate::Result<()> + Send + Sync {}
impl<F: Fn(&Path) -> crate::Result<()> + Send + Sync> FileRemover for F {}

/// Orchestrates the plan + write phases of a column archive.
pub struct ColumnArchiveWriter {
    options: PlannerOptions,
}

impl ColumnArchiveWriter {
    /// Creates a writer with the given plan/write-phase options.
    #[must_use]
    pub fn new(options: PlannerOptions) -> Self {
        Self { options }
    }

    /// Removes every stale field/index file already in `dir`, plans shard
    /// boundaries over `shard_paths`, then runs the write phase with
    /// `parallelism` workers, decoding each merged record via `decode`.
    pub fn write<D: FieldDecoder, R: FileRemover>(&self, dir: &Path, shard_paths: &[PathBuf], decode: D, remove: R) -> crate::Result<()> {
        remove_stale_archive_files(dir, &remove)?;

        let planner = ShardBoundsPlanner::plan(shard_paths, &self.options)?;
        let ranges = planner.shard_ranges().to_vec();
        let pool = Arc::new(Pool::new(self.options.parallelism.max(2) * FIELD_SUFFIXES.len()));
        let errors = ErrorOnce::new();

        let (tx, rx) = crossbeam_channel::bounded::<(CoordKey, CoordKey)>(ranges.len().max(1));
        for range in &ranges {
            // Channel is sized to hold every range, so this never blocks or fails.
            let _ = tx.send(*range);
        }
        drop(tx);

        std::thread::scope(|scope| {
            for _ in 0..self.options.parallelism.max(1) {
                let rx = rx.clone();
                let planner = &planner;
                let decode = &decode;
                let pool = Arc::clone(&pool);
                let errors = &errors;

                scope.spawn(move || {
                    while let Ok((start, limit)) = rx.recv() {
                        if let Err(e) = write_one_shard(dir, planner, start, limit, decode, &pool) {
                            log::warn!("column archive worker failed for range starting at {start:?}: {e}");
                            errors.set_if_empty(e);
                        }
                    }
                });
            }
        });

        if let Some(e) = errors.take() {
            return Err(crate::Error::Io(std::io::Error::other(e.to_string())));
        }

        log::debug!("column archive write phase finished: {} shards in {}", ranges.len(), dir.display());
        Ok(())
    }
}

fn write_one_shard(
    dir: &Path,
    planner: &ShardBoundsPlanner,
    start: CoordKey,
    limit: CoordKey,
    decode: &impl FieldDecoder,
    pool: &Arc<Pool>,
) -> crate::Result<()> {
    let mut leaves = Vec::new();
    for path in planner.input_paths() {
        let Some((start_offset, limit_offset)) = planner.byte_range(path, start, limit) else {
            continue;
        };
        let opts = ReaderOptions {
            byte_range: Some((start_offset, limit_offset)),
            prefetch_depth: 0,
        };
        leaves.push(ShardReader::open(path, opts)?);
    }

    let range_name = format!("{},{}", format_boundary(start), format_boundary(limit));
    let field_path = |suffix: &str| dir.join(format!("{range_name}.{suffix}"));
    let open = |suffix: &str| -> crate::Result<Box<dyn Write + Send>> { Ok(Box::new(std::fs::File::create(field_path(suffix))?)) };

    let mut coord_w: FieldBlockWriter<CoordCodec> = FieldBlockWriter::new(open("coord")?, CompressionType::Snappy, Arc::clone(pool));
    let mut mapq_w: FieldBlockWriter<MapqCodec> = FieldBlockWriter::new(open("mapq")?, CompressionType::Snappy, Arc::clone(pool));
    let mut flag_w: FieldBlockWriter<FlagCodec> = FieldBlockWriter::new(open("flag")?, CompressionType::Snappy, Arc::clone(pool));
    let mut tlen_w: FieldBlockWriter<VarIntCodec> = FieldBlockWriter::new(open("template_len")?, CompressionType::Snappy, Arc::clone(pool));
    let mut cigar_w: FieldBlockWriter<CigarCodec> = FieldBlockWriter::new(open("cigar")?, CompressionType::Snappy, Arc::clone(pool));
    let mut seq_w: FieldBlockWriter<SeqCodec> = FieldBlockWriter::new(open("seq")?, CompressionType::Snappy, Arc::clone(pool));
    let mut qual_w: FieldBlockWriter<QualCodec> = FieldBlockWriter::new(open("qual")?, CompressionType::Snappy, Arc::clone(pool));
    let mut name_w: FieldBlockWriter<NameCodec> = FieldBlockWriter::new(open("name")?, CompressionType::Snappy, Arc::clone(pool));
    let mut aux_w: FieldBlockWriter<AuxCodec> = FieldBlockWriter::new(open("aux")?, CompressionType::Snappy, Arc::clone(pool));

    let mut addr_gen = AddressGenerator::new();
    let mut total_records: u64 = 0;
    let mut first_addr: Option<Address> = None;
    let mut last_addr: Option<Address> = None;

    if !leaves.is_empty() {
        let tree = MergeTree::new(leaves)?;
        tree.merge_into(|key, payload| {
            if key >= limit {
                return Ok(false);
            }
            if key < start {
                // Falls in range only because of the one-block backup
                // start selection performs; it is discarded silently.
                return Ok(true);
            }

            let fields = decode(crate::record::strip_length_prefix(payload));
            let addr = addr_gen.next(fields.ref_id, fields.pos);
            first_addr.get_or_insert(addr);
            last_addr = Some(addr);
            total_records += 1;

            coord_w.add(addr, &(fields.ref_id, fields.pos))?;
            mapq_w.add(addr, &fields.mapq)?;
            flag_w.add(addr, &fields.flag)?;
            tlen_w.add(addr, &fields.template_len)?;
            cigar_w.add(addr, &fields.cigar)?;
            seq_w.add(addr, &fields.sequence)?;
            qual_w.add(addr, &fields.qualities)?;
            name_w.add(addr, &fields.name)?;
            aux_w.add(addr, &fields.aux_tags)?;

            Ok(true)
        })?;
    }

    coord_w.close()?;
    mapq_w.close()?;
    flag_w.close()?;
    tlen_w.close()?;
    cigar_w.close()?;
    seq_w.close()?;
    qual_w.close()?;
    name_w.close()?;
    aux_w.close()?;

    let index = ColumnShardIndex {
        start_addr: first_addr.unwrap_or(Address::new(0, 0, 0)),
        limit_addr: last_addr.unwrap_or(Address::new(0, 0, 0)),
        total_records,
    };
    std::fs::write(dir.join(format!("{range_name}.index")), index.encode())?;

    Ok(())
}

/// Renders one boundary coordinate for a shard filename: mapped
/// coordinates as `ref:pos`; the unmapped sentinel and the open-ended
/// upper bound as `-:-`.
fn format_boundary(key: CoordKey) -> String {
    if key.is_unmapped() || key == CoordKey::INFINITY {
        "-:-".to_string()
    } else {
        let (r, p, _) = key.unpack();
        format!("{r}:{p}")
    }
}

/// The shard-level manifest written alongside a shard's field files: one
/// index file per shard, storing the shard-level range and record count.
struct ColumnShardIndex {
    start_addr: Address,
    limit_addr: Address,
    total_records: u64,
}

impl ColumnShardIndex {
    fn encode(&self) -> Vec<u8> {
        use byteorder::{BigEndian, WriteBytesExt};
        let mut buf = Vec::new();
        let _ = buf.write_all(b"RSCI");
        let _ = buf.write_i32::<BigEndian>(self.start_addr.ref_id);
        let _ = buf.write_i32::<BigEndian>(self.start_addr.pos);
        let _ = buf.write_u32::<BigEndian>(self.start_addr.seq);
        let _ = buf.write_i32::<BigEndian>(self.limit_addr.ref_id);
        let _ = buf.write_i32::<BigEndian>(self.limit_addr.pos);
        let _ = buf.write_u32::<BigEndian>(self.limit_addr.seq);
        let _ = buf.write_u64::<BigEndian>(self.total_records);
        for field in FIELD_SUFFIXES {
            let _ = buf.write_u32::<BigEndian>(u32::try_from(field.len()).unwrap_or(0));
            buf.extend_from_slice(field.as_bytes());
        }
        buf
    }
}

fn remove_stale_archive_files(dir: &Path, remove: &impl FileRemover) -> crate::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let Some((_, suffix)) = name.rsplit_once('.') else {
            continue;
        };

        if suffix == "index" || FIELD_SUFFIXES.contains(&suffix) {
            remove(&path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionType as Compression;
    use crate::config::SorterOptions;
    use crate::record::{with_length_prefix, Record};
    use crate::sorter::Sorter;
    use test_log::test;

    fn simple_decode(payload: &[u8]) -> AlignedFields {
        // Test-only wire format: ref_id(4 LE) | pos(4 LE) | name_len(1) | name
        let ref_id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let pos = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let name_len = payload[8] as usize;
        let name = payload[9..9 + name_len].to_vec();

        AlignedFields {
            ref_id,
            pos,
            reverse: false,
            name,
            mapq: 60,
            flag: 0,
            cigar: vec![],
            template_len: 0,
            sequence: vec![],
            qualities: vec![],
            aux_tags: vec![],
        }
    }

    fn encode_test_record(ref_id: i32, pos: i32, name: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&ref_id.to_le_bytes());
        payload.extend_from_slice(&pos.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        payload.push(name.len() as u8);
        payload.extend_from_slice(name);
        with_length_prefix(&payload)
    }

    #[test]
    fn writes_field_files_and_index_for_one_shard() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let shard_path = dir.path().join("shard-0");

        let mut sorter = Sorter::new(&shard_path, Vec::new(), SorterOptions::default().with_shard_index(1))?;
        sorter.add_record(Record::mapped(0, 10, false, encode_test_record(0, 10, b"r1")), |rec| rec.payload.clone())?;
        sorter.add_record(Record::mapped(0, 20, false, encode_test_record(0, 20, b"r2")), |rec| rec.payload.clone())?;
        sorter.close()?;

        let out_dir = dir.path().join("archive");
        let writer = ColumnArchiveWriter::new(PlannerOptions::default().with_records_per_shard(1_000_000).with_parallelism(1));
        writer.write(&out_dir, &[shard_path], simple_decode, |path| {
            std::fs::remove_file(path).map_err(Into::into)
        })?;

        let mapq_count = std::fs::read_dir(&out_dir)?
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().and_then(|e| e.to_str()) == Some("mapq"))
            .count();
        assert_eq!(mapq_count, 1);

        let index_count = std::fs::read_dir(&out_dir)?
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().and_then(|e| e.to_str()) == Some("index"))
            .count();
        assert_eq!(index_count, 1);
        Ok(())
    }

    #[test]
    fn format_boundary_renders_sentinels_with_dashes() {
        assert_eq!(format_boundary(CoordKey::UNMAPPED), "-:-");
        assert_eq!(format_boundary(CoordKey::INFINITY), "-:-");
        assert_eq!(format_boundary(CoordKey::mapped(2, 99, false)), "2:99");
    }

    #[test]
    fn remove_stale_archive_files_only_touches_field_and_index_files() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("0:0,1:0.mapq"), b"stale")?;
        std::fs::write(dir.path().join("0:0,1:0.index"), b"stale")?;
        std::fs::write(dir.path().join("unrelated.txt"), b"keep-me")?;

        let removed = std::sync::Mutex::new(Vec::new());
        remove_stale_archive_files(dir.path(), &|path: &Path| {
            #[allow(clippy::unwrap_used)]
            removed.lock().unwrap().push(path.to_path_buf());
            Ok(())
        })?;

        #[allow(clippy::unwrap_used)]
        let removed = removed.into_inner().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("unrelated.txt").exists());
        Ok(())
    }
}
