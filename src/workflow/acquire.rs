//! **Acquire** workflow — `Idle -> Preparing -> Writing -> Finalizing ->
//! (Done | Aborted | Failed)` (spec §4.9).
//!
//! Reads a raw source stream chunk by chunk, feeds it through `DigestSet`,
//! packs it via `chunk_codec::pack`, and writes it out through
//! `segment_file::SegmentWriter`, rolling to a new segment once the current
//! one reaches `segment_file_size`. Modeled on the teacher's plain logging
//! idiom; no teacher precedent exists for the write side itself.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use log::{debug, info, warn};

use crate::chunk_codec::{self, PackPolicy};
use crate::chunk_index::ChunkDescriptor;
use crate::digest::{DigestAlgorithm, DigestSet};
use crate::error::{EwfError, Result};
use crate::file_pool::{FilePool, OpenMode};
use crate::header_values::{HeaderDialect, HeaderValues};
use crate::media_values::{ContainerFormat, MediaValues};
use crate::section::{self, FormatVersion};
use crate::segment_file::SegmentWriter;
use crate::segment_table::{segment_extension, NamingSchema};
use crate::session::{RangeList, SectorRange};

use super::AbortFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireState {
    Idle,
    Preparing,
    Writing,
    Finalizing,
    Done,
    Aborted,
    Failed,
}

/// Everything the `Writing` state needs to know about the target container
/// and the acquisition policy (spec §4.9's worked examples: pattern-fill,
/// empty-block, checksum-error detection, multi-segment split).
pub struct AcquireOptions {
    pub format: FormatVersion,
    pub container_format: ContainerFormat,
    pub bytes_per_sector: u32,
    pub sectors_per_chunk: u32,
    pub media_size: u64,
    /// Rolls to a new segment once the current one's packed payload would
    /// reach this many bytes (spec §4.6).
    pub segment_file_size: u64,
    pub naming_schema: NamingSchema,
    pub pack_policy: PackPolicy,
    pub digest_algorithms: Vec<DigestAlgorithm>,
    /// On a source read error: zero-fill the chunk and record an
    /// `AcquiryError` rather than aborting the whole acquisition.
    pub wipe_on_error: bool,
    pub header_values: HeaderValues,
}

pub struct AcquireReport {
    pub segments_written: u16,
    pub chunks_written: u64,
    pub digests: Vec<(DigestAlgorithm, String)>,
    pub acquiry_errors: RangeList,
}

fn segment_path(stem: &Path, segment_number: u16, schema: NamingSchema) -> Result<PathBuf> {
    let extension = segment_extension(segment_number, schema)?;
    let mut path = stem.to_path_buf();
    let file_name = format!(
        "{}.{}",
        stem.file_name().and_then(|n| n.to_str()).unwrap_or(""),
        extension
    );
    path.set_file_name(file_name);
    Ok(path)
}

fn header_dialect(format: FormatVersion) -> HeaderDialect {
    match format {
        FormatVersion::V1 => HeaderDialect::Header,
        FormatVersion::V2 => HeaderDialect::XHeader,
    }
}

/// One physical segment file's worth of acquisition: writes header, volume,
/// the accumulated `sectors`/`table` pair, and `next`/`done`.
fn write_segment(
    path: &Path,
    segment_number: u16,
    options: &AcquireOptions,
    media_values: &MediaValues,
    first_chunk_index: u64,
    packed_bytes: &[u8],
    relative_descriptors: &[ChunkDescriptor],
    is_last_segment: bool,
) -> Result<()> {
    std::fs::write(path, []).map_err(EwfError::Io)?;
    let mut pool = FilePool::new(2);
    let entry = pool.register(path, OpenMode::ReadWrite);
    let mut writer = SegmentWriter::create(
        &mut pool,
        entry,
        options.format,
        segment_number,
        options.container_format,
    )?;

    writer.write_header(&mut pool, &options.header_values, header_dialect(options.format))?;
    writer.write_volume(&mut pool, media_values)?;

    let descriptor_size = match options.format {
        FormatVersion::V1 => section::DESCRIPTOR_V1_SIZE,
        FormatVersion::V2 => section::DESCRIPTOR_V2_SIZE,
    } as u64;
    let sectors_payload_start = writer.cursor() + descriptor_size;
    writer.write_sectors(&mut pool, packed_bytes)?;

    let descriptors: Vec<ChunkDescriptor> = relative_descriptors
        .iter()
        .map(|d| ChunkDescriptor {
            file_pool_entry: entry,
            data_offset: d.data_offset + sectors_payload_start,
            data_size: d.data_size,
            flags: d.flags,
            inline_pattern: d.inline_pattern,
        })
        .collect();
    writer.write_table(&mut pool, first_chunk_index, sectors_payload_start, &descriptors, false)?;
    writer.finalize(&mut pool, is_last_segment)?;
    Ok(())
}

pub struct AcquireWorkflow<R> {
    source: R,
    stem: PathBuf,
    options: AcquireOptions,
    abort_flag: AbortFlag,
    state: AcquireState,
}

impl<R: Read> AcquireWorkflow<R> {
    pub fn new(source: R, stem: impl Into<PathBuf>, options: AcquireOptions, abort_flag: AbortFlag) -> Self {
        AcquireWorkflow {
            source,
            stem: stem.into(),
            options,
            abort_flag,
            state: AcquireState::Idle,
        }
    }

    pub fn state(&self) -> AcquireState {
        self.state
    }

    pub fn run(&mut self) -> Result<AcquireReport> {
        self.state = AcquireState::Preparing;
        info!(
            "acquire: preparing {} bytes, {} bytes/sector, {} sectors/chunk",
            self.options.media_size, self.options.bytes_per_sector, self.options.sectors_per_chunk
        );

        let media_values = match MediaValues::new(
            self.options.media_size,
            self.options.bytes_per_sector,
            self.options.sectors_per_chunk,
            self.options.container_format,
        ) {
            Ok(mv) => mv,
            Err(err) => {
                self.state = AcquireState::Failed;
                return Err(err);
            }
        };

        self.state = AcquireState::Writing;
        let chunk_size = media_values.chunk_size();
        let total_chunks = media_values.number_of_chunks;
        let mut digest_set = DigestSet::new(&self.options.digest_algorithms);
        let mut acquiry_errors = RangeList::new();

        let mut segment_number: u16 = 1;
        let mut chunk_number: u64 = 0;
        let mut segments_written: u16 = 0;

        let abort_flag = &self.abort_flag;
        let options = &self.options;
        let stem = &self.stem;
        let source = &mut self.source;

        let outcome: Result<()> = (|| {
            while chunk_number < total_chunks {
                if abort_flag.load(Ordering::SeqCst) {
                    info!("acquire: abort observed before segment {segment_number}");
                    return Err(EwfError::Aborted);
                }

                let path = segment_path(stem, segment_number, options.naming_schema)?;
                let first_chunk_of_segment = chunk_number;
                let mut packed_bytes: Vec<u8> = Vec::new();
                let mut descriptors: Vec<ChunkDescriptor> = Vec::new();
                let mut relative_offset: u64 = 0;

                while chunk_number < total_chunks {
                    if abort_flag.load(Ordering::SeqCst) {
                        info!("acquire: abort observed mid-segment at chunk {chunk_number}");
                        if !descriptors.is_empty() {
                            write_segment(
                                &path,
                                segment_number,
                                options,
                                &media_values,
                                first_chunk_of_segment,
                                &packed_bytes,
                                &descriptors,
                                false,
                            )?;
                        }
                        return Err(EwfError::Aborted);
                    }

                    let mut plain = vec![0u8; chunk_size as usize];
                    let remaining = media_values.media_size.saturating_sub(chunk_number * chunk_size);
                    let take = remaining.min(chunk_size) as usize;
                    if let Err(e) = source.read_exact(&mut plain[..take]) {
                        warn!("acquire: read error at chunk {chunk_number}: {e}");
                        let start_sector = chunk_number * options.sectors_per_chunk as u64;
                        acquiry_errors.add(SectorRange {
                            start_sector,
                            number_of_sectors: options.sectors_per_chunk as u64,
                        });
                        if !options.wipe_on_error {
                            return Err(EwfError::Io(e));
                        }
                        plain[..take].iter_mut().for_each(|b| *b = 0);
                    }

                    digest_set.update(&plain[..take]);

                    let packed = chunk_codec::pack(&plain, options.pack_policy)?;
                    descriptors.push(ChunkDescriptor {
                        file_pool_entry: 0,
                        data_offset: relative_offset,
                        data_size: packed.bytes.len() as u64,
                        flags: packed.flags,
                        inline_pattern: None,
                    });
                    relative_offset += packed.bytes.len() as u64;
                    packed_bytes.extend_from_slice(&packed.bytes);

                    chunk_number += 1;
                    if packed_bytes.len() as u64 >= options.segment_file_size {
                        break;
                    }
                }

                let is_last_segment = chunk_number >= total_chunks;
                write_segment(
                    &path,
                    segment_number,
                    options,
                    &media_values,
                    first_chunk_of_segment,
                    &packed_bytes,
                    &descriptors,
                    is_last_segment,
                )?;
                segments_written += 1;
                debug!(
                    "acquire: wrote segment {} ({} chunks, {} bytes packed)",
                    segment_number,
                    descriptors.len(),
                    packed_bytes.len()
                );
                segment_number += 1;
            }
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                self.state = AcquireState::Finalizing;
                let digests = digest_set.finalize();
                self.state = AcquireState::Done;
                info!("acquire: done — {segments_written} segment(s), {chunk_number} chunk(s)");
                Ok(AcquireReport {
                    segments_written,
                    chunks_written: chunk_number,
                    digests,
                    acquiry_errors,
                })
            }
            Err(EwfError::Aborted) => {
                self.state = AcquireState::Aborted;
                Err(EwfError::Aborted)
            }
            Err(err) => {
                self.state = AcquireState::Failed;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::ewf::Handle;
    use std::io::Cursor;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn default_options(media_size: u64, header_values: HeaderValues) -> AcquireOptions {
        AcquireOptions {
            format: FormatVersion::V1,
            container_format: ContainerFormat::Encase6,
            bytes_per_sector: 512,
            sectors_per_chunk: 4,
            media_size,
            segment_file_size: 1024 * 1024,
            naming_schema: NamingSchema::Encase,
            pack_policy: PackPolicy::default(),
            digest_algorithms: vec![DigestAlgorithm::Md5],
            wipe_on_error: true,
            header_values,
        }
    }

    #[test]
    fn pattern_fill_source_acquires_into_one_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case");
        let source = Cursor::new(vec![0x58u8; 2048]);
        let mut header = HeaderValues::new();
        header.set("case_number", "C2026-PF01");
        let options = default_options(2048, header);

        let mut workflow = AcquireWorkflow::new(source, &stem, options, Arc::new(AtomicBool::new(false)));
        let report = workflow.run().unwrap();
        assert_eq!(report.segments_written, 1);
        assert_eq!(report.chunks_written, 1);
        assert!(report.acquiry_errors.is_empty());

        let mut handle = Handle::open(stem.with_extension("E01").to_str().unwrap()).unwrap();
        let mut buf = vec![0u8; 2048];
        std::io::Read::read_exact(&mut handle, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x58));
    }

    #[test]
    fn split_acquire_produces_multiple_segments() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case");
        let media_size = 8192u64;
        let plain: Vec<u8> = (0..media_size as u32).map(|i| (i % 253) as u8).collect();
        let source = Cursor::new(plain.clone());
        let mut options = default_options(media_size, HeaderValues::new());
        options.segment_file_size = 1024;
        options.pack_policy.level = crate::codec::CompressionLevel::None;
        options.pack_policy.pattern_fill_detect = false;
        options.pack_policy.compress_empty = false;

        let mut workflow = AcquireWorkflow::new(source, &stem, options, Arc::new(AtomicBool::new(false)));
        let report = workflow.run().unwrap();
        assert!(report.segments_written > 1);

        let mut handle = Handle::open(stem.with_extension("E01").to_str().unwrap()).unwrap();
        let mut buf = vec![0u8; media_size as usize];
        std::io::Read::read_exact(&mut handle, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn abort_before_any_segment_reports_aborted_state() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case");
        let source = Cursor::new(vec![0u8; 2048]);
        let options = default_options(2048, HeaderValues::new());
        let flag = Arc::new(AtomicBool::new(true));
        let mut workflow = AcquireWorkflow::new(source, &stem, options, flag);
        let err = workflow.run().unwrap_err();
        assert!(matches!(err, EwfError::Aborted));
        assert_eq!(workflow.state(), AcquireState::Aborted);
    }
}
