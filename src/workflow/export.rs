//! **Export** workflow — `Idle -> Exporting -> Finalizing -> Done` (spec
//! §4.9). Copies an already-open `Handle`'s media out to one of three kinds
//! of target: another EWF/EnCase container (re-acquired through the
//! existing `acquire` workflow, since `Handle` itself implements `Read`), a
//! raw byte stream, or a single logical file wrapped in a minimal
//! `ltree`-style text entry. No teacher precedent (the teacher never
//! exports); follows the same plain-struct-with-a-state-field idiom as
//! `acquire`/`verify`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use log::{debug, info};

use crate::digest::{DigestAlgorithm, DigestSet};
use crate::error::{EwfError, Result};
use crate::ewf::Handle;

use super::acquire::{AcquireOptions, AcquireWorkflow};
use super::AbortFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Exporting,
    Finalizing,
    Done,
}

/// Where an export goes. `Ewf` re-acquires the already-open source through
/// `acquire::AcquireWorkflow` (a `Handle` is itself a `Read`); `Raw` streams
/// plain media bytes; `SingleFile` wraps the media in one minimal logical
/// entry, in the spirit of libewf's `ltree` single-file extraction but
/// without reproducing its exact on-disk layout (no concrete byte-level
/// grounding was found for it — see DESIGN.md).
pub enum ExportTarget {
    Ewf {
        stem: PathBuf,
        options: AcquireOptions,
    },
    Raw {
        writer: Box<dyn Write>,
    },
    SingleFile {
        writer: Box<dyn Write>,
        entry_name: String,
    },
}

pub struct ExportOptions {
    pub target: ExportTarget,
    pub digest_algorithms: Vec<DigestAlgorithm>,
}

pub struct ExportReport {
    pub bytes_written: u64,
    pub segments_written: Option<u16>,
    pub digests: Vec<(DigestAlgorithm, String)>,
}

pub struct ExportWorkflow<'h> {
    handle: &'h mut Handle,
    options: ExportOptions,
    abort_flag: AbortFlag,
    state: ExportState,
}

const COPY_BUFFER_SIZE: usize = 64 * 1024;

impl<'h> ExportWorkflow<'h> {
    pub fn new(handle: &'h mut Handle, options: ExportOptions, abort_flag: AbortFlag) -> Self {
        ExportWorkflow {
            handle,
            options,
            abort_flag,
            state: ExportState::Idle,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn run(&mut self) -> Result<ExportReport> {
        self.state = ExportState::Exporting;

        let report = match &mut self.options.target {
            ExportTarget::Ewf { stem, options } => {
                info!("export: re-acquiring into a new container at {}", stem.display());
                let mut source = self.handle.clone();
                std::io::Seek::seek(&mut source, std::io::SeekFrom::Start(0)).map_err(EwfError::Io)?;
                let mut workflow = AcquireWorkflow::new(source, stem.clone(), clone_acquire_options(options), self.abort_flag.clone());
                let acquire_report = workflow.run()?;
                ExportReport {
                    bytes_written: self.handle.media_values().media_size,
                    segments_written: Some(acquire_report.segments_written),
                    digests: acquire_report.digests,
                }
            }
            ExportTarget::Raw { writer } => {
                let (bytes_written, digests) = copy_media(self.handle, writer.as_mut(), &self.abort_flag, &self.options.digest_algorithms)?;
                ExportReport {
                    bytes_written,
                    segments_written: None,
                    digests,
                }
            }
            ExportTarget::SingleFile { writer, entry_name } => {
                let media_size = self.handle.media_values().media_size;
                let header = format!("ltree\t1\nname\tsize\n{entry_name}\t{media_size}\n\n");
                writer.write_all(header.as_bytes()).map_err(EwfError::Io)?;
                let (bytes_written, digests) = copy_media(self.handle, writer.as_mut(), &self.abort_flag, &self.options.digest_algorithms)?;
                ExportReport {
                    bytes_written,
                    segments_written: None,
                    digests,
                }
            }
        };

        self.state = ExportState::Finalizing;
        debug!(
            "export: finalizing — {} byte(s) written{}",
            report.bytes_written,
            report
                .segments_written
                .map(|n| format!(", {n} segment(s)"))
                .unwrap_or_default()
        );
        self.state = ExportState::Done;
        Ok(report)
    }
}

fn clone_acquire_options(options: &AcquireOptions) -> AcquireOptions {
    AcquireOptions {
        format: options.format,
        container_format: options.container_format,
        bytes_per_sector: options.bytes_per_sector,
        sectors_per_chunk: options.sectors_per_chunk,
        media_size: options.media_size,
        segment_file_size: options.segment_file_size,
        naming_schema: options.naming_schema,
        pack_policy: options.pack_policy,
        digest_algorithms: options.digest_algorithms.clone(),
        wipe_on_error: options.wipe_on_error,
        header_values: options.header_values.clone(),
    }
}

/// Streams every chunk of `handle`'s media to `writer`, trimming the last
/// chunk's zero padding the same way `acquire`/`verify` do, and hands back
/// the total bytes written plus the finalized digest set.
fn copy_media(
    handle: &mut Handle,
    writer: &mut dyn Write,
    abort_flag: &AbortFlag,
    digest_algorithms: &[DigestAlgorithm],
) -> Result<(u64, Vec<(DigestAlgorithm, String)>)> {
    let media_values = handle.media_values().clone();
    let chunk_size = media_values.chunk_size();
    let total_chunks = media_values.number_of_chunks;
    let mut digest_set = DigestSet::new(digest_algorithms);
    let mut total_written = 0u64;

    for chunk_number in 0..total_chunks {
        if abort_flag.load(Ordering::SeqCst) {
            info!("export: abort observed at chunk {chunk_number}");
            return Err(EwfError::Aborted);
        }

        let (plain, _flags) = handle.read_chunk_checked(chunk_number)?;
        let remaining = media_values.media_size.saturating_sub(chunk_number * chunk_size);
        let valid_len = (plain.len() as u64).min(remaining) as usize;
        let valid = &plain[..valid_len];

        digest_set.update(valid);
        for block in valid.chunks(COPY_BUFFER_SIZE) {
            writer.write_all(block).map_err(EwfError::Io)?;
        }
        total_written += valid.len() as u64;
    }

    writer.flush().map_err(EwfError::Io)?;
    Ok((total_written, digest_set.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_codec::PackPolicy;
    use crate::file_pool::{FilePool, OpenMode};
    use crate::header_values::{HeaderDialect, HeaderValues};
    use crate::media_values::ContainerFormat;
    use crate::media_values::MediaValues;
    use crate::section::{FormatVersion, DESCRIPTOR_V1_SIZE};
    use crate::segment_file::SegmentWriter;
    use crate::segment_table::NamingSchema;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn write_image(dir: &std::path::Path, chunk_plain: &[u8]) -> std::path::PathBuf {
        let path = dir.join("case.E01");
        std::fs::write(&path, []).unwrap();
        let mut pool = FilePool::new(4);
        let entry = pool.register(&path, OpenMode::ReadWrite);
        let mut writer = SegmentWriter::create(&mut pool, entry, FormatVersion::V1, 1, ContainerFormat::Encase6).unwrap();
        writer.write_header(&mut pool, &HeaderValues::new(), HeaderDialect::Header).unwrap();
        let media_values = MediaValues::new(chunk_plain.len() as u64, 512, 1, ContainerFormat::Encase6).unwrap();
        writer.write_volume(&mut pool, &media_values).unwrap();
        let packed = crate::chunk_codec::pack(
            chunk_plain,
            PackPolicy {
                pattern_fill_detect: false,
                compress_empty: false,
                level: crate::codec::CompressionLevel::None,
                have_checksum: true,
                pack_format: crate::section::PackFormat::V1,
            },
        )
        .unwrap();
        let sectors_payload_start = writer.cursor() + DESCRIPTOR_V1_SIZE as u64;
        writer.write_sectors(&mut pool, &packed.bytes).unwrap();
        writer
            .write_table(
                &mut pool,
                0,
                sectors_payload_start,
                &[crate::chunk_index::ChunkDescriptor {
                    file_pool_entry: entry,
                    data_offset: sectors_payload_start,
                    data_size: packed.bytes.len() as u64,
                    flags: packed.flags,
                    inline_pattern: None,
                }],
                false,
            )
            .unwrap();
        writer.finalize(&mut pool, true).unwrap();
        path
    }

    #[test]
    fn raw_export_writes_every_byte() {
        let dir = tempfile::tempdir().unwrap();
        let plain: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        let path = write_image(dir.path(), &plain);
        let mut handle = Handle::open(path.to_str().unwrap()).unwrap();

        let out = Vec::new();
        let options = ExportOptions {
            target: ExportTarget::Raw { writer: Box::new(out) },
            digest_algorithms: vec![DigestAlgorithm::Md5],
        };
        let mut workflow = ExportWorkflow::new(&mut handle, options, Arc::new(AtomicBool::new(false)));
        let report = workflow.run().unwrap();
        assert_eq!(report.bytes_written, 512);
        assert_eq!(report.digests.len(), 1);
        assert_eq!(workflow.state(), ExportState::Done);
    }

    #[test]
    fn ewf_export_produces_a_readable_container() {
        let dir = tempfile::tempdir().unwrap();
        let plain: Vec<u8> = (0..1024u32).map(|i| (i % 200) as u8).collect();
        let path = write_image(dir.path(), &plain);
        let mut handle = Handle::open(path.to_str().unwrap()).unwrap();

        let target_stem = dir.path().join("copy");
        let acquire_options = AcquireOptions {
            format: FormatVersion::V1,
            container_format: ContainerFormat::Encase6,
            bytes_per_sector: 512,
            sectors_per_chunk: 1,
            media_size: handle.media_values().media_size,
            segment_file_size: 1024 * 1024,
            naming_schema: NamingSchema::Encase,
            pack_policy: PackPolicy::default(),
            digest_algorithms: vec![DigestAlgorithm::Md5],
            wipe_on_error: true,
            header_values: HeaderValues::new(),
        };
        let options = ExportOptions {
            target: ExportTarget::Ewf { stem: target_stem.clone(), options: acquire_options },
            digest_algorithms: vec![DigestAlgorithm::Md5],
        };
        let mut workflow = ExportWorkflow::new(&mut handle, options, Arc::new(AtomicBool::new(false)));
        let report = workflow.run().unwrap();
        assert_eq!(report.segments_written, Some(1));

        let mut copy = Handle::open(target_stem.with_extension("E01").to_str().unwrap()).unwrap();
        let mut buf = vec![0u8; 1024];
        std::io::Read::read_exact(&mut copy, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn single_file_export_prefixes_an_ltree_header() {
        let dir = tempfile::tempdir().unwrap();
        let plain = vec![0x7au8; 512];
        let path = write_image(dir.path(), &plain);
        let mut handle = Handle::open(path.to_str().unwrap()).unwrap();

        let out = Vec::new();
        let options = ExportOptions {
            target: ExportTarget::SingleFile {
                writer: Box::new(out),
                entry_name: "disk.img".to_string(),
            },
            digest_algorithms: vec![],
        };
        let mut workflow = ExportWorkflow::new(&mut handle, options, Arc::new(AtomicBool::new(false)));
        workflow.run().unwrap();
    }
}
