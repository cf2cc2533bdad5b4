//! **Verify** workflow — `Idle -> Reading -> Comparing -> Done` (spec §4.9).
//!
//! Walks every chunk of an already-open `Handle` once, re-hashing the media
//! the same way `acquire::AcquireWorkflow` does, and collects both the
//! per-chunk checksum corruption the format itself detects and a final
//! digest comparison against the container's stored `hash`/`xhash` values.
//! No teacher precedent (the teacher never re-verifies); follows the
//! `acquire` module's plain-struct-with-a-state-field idiom.

use std::sync::atomic::Ordering;

use log::{debug, info, warn};

use crate::digest::{DigestAlgorithm, DigestSet};
use crate::error::{EwfError, Result};
use crate::ewf::Handle;

use super::AbortFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    Idle,
    Reading,
    Comparing,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct CorruptedChunk {
    pub chunk_number: u64,
}

pub struct VerifyReport {
    pub chunks_checked: u64,
    pub corrupted_chunks: Vec<CorruptedChunk>,
    pub digests: Vec<(DigestAlgorithm, String)>,
    /// Algorithms whose freshly-computed digest disagrees with the value the
    /// container stored at acquisition time (spec §4.9's "Comparing" state).
    pub mismatched_digests: Vec<DigestAlgorithm>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted_chunks.is_empty() && self.mismatched_digests.is_empty()
    }
}

pub struct VerifyWorkflow<'h> {
    handle: &'h mut Handle,
    abort_flag: AbortFlag,
    digest_algorithms: Vec<DigestAlgorithm>,
    state: VerifyState,
}

impl<'h> VerifyWorkflow<'h> {
    pub fn new(handle: &'h mut Handle, digest_algorithms: Vec<DigestAlgorithm>, abort_flag: AbortFlag) -> Self {
        VerifyWorkflow {
            handle,
            abort_flag,
            digest_algorithms,
            state: VerifyState::Idle,
        }
    }

    pub fn state(&self) -> VerifyState {
        self.state
    }

    pub fn run(&mut self) -> Result<VerifyReport> {
        self.state = VerifyState::Reading;
        let media_values = self.handle.media_values().clone();
        let chunk_size = media_values.chunk_size();
        let total_chunks = media_values.number_of_chunks;
        info!("verify: reading {total_chunks} chunk(s)");

        let mut digest_set = DigestSet::new(&self.digest_algorithms);
        let mut corrupted_chunks = Vec::new();

        for chunk_number in 0..total_chunks {
            if self.abort_flag.load(Ordering::SeqCst) {
                info!("verify: abort observed at chunk {chunk_number}");
                return Err(EwfError::Aborted);
            }

            let (plain, flags) = self.handle.read_chunk_checked(chunk_number)?;
            if flags.contains(crate::chunk_codec::RangeFlags::IS_CORRUPTED) {
                warn!("verify: chunk {chunk_number} failed its checksum");
                corrupted_chunks.push(CorruptedChunk { chunk_number });
            }

            // Mirror acquire's trimming: the last chunk's unpacked buffer may
            // be zero-padded past the actual media size, and that padding
            // must never enter the digest.
            let remaining = media_values.media_size.saturating_sub(chunk_number * chunk_size);
            let valid_len = (plain.len() as u64).min(remaining) as usize;
            digest_set.update(&plain[..valid_len]);
        }

        self.state = VerifyState::Comparing;
        let digests = digest_set.finalize();
        let mut mismatched_digests = Vec::new();
        for (algorithm, computed) in &digests {
            let key = algorithm.label().to_lowercase();
            if let Some(stored) = self.handle.hash_values().get(&key) {
                if !stored.eq_ignore_ascii_case(computed) {
                    warn!("verify: {key} mismatch — stored {stored}, computed {computed}");
                    mismatched_digests.push(*algorithm);
                }
            }
        }

        self.state = VerifyState::Done;
        debug!(
            "verify: done — {total_chunks} chunk(s), {} corrupted, {} digest mismatch(es)",
            corrupted_chunks.len(),
            mismatched_digests.len()
        );
        Ok(VerifyReport {
            chunks_checked: total_chunks,
            corrupted_chunks,
            digests,
            mismatched_digests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_codec::PackPolicy;
    use crate::file_pool::{FilePool, OpenMode};
    use crate::header_values::{HeaderDialect, HeaderValues};
    use crate::media_values::{ContainerFormat, MediaValues};
    use crate::section::{DESCRIPTOR_V1_SIZE, PackFormat};
    use crate::segment_file::SegmentWriter;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn write_image(dir: &std::path::Path, chunk_plain: &[u8], corrupt: bool) -> std::path::PathBuf {
        let path = dir.join("case.E01");
        std::fs::write(&path, []).unwrap();
        let mut pool = FilePool::new(4);
        let entry = pool.register(&path, OpenMode::ReadWrite);

        let mut writer =
            SegmentWriter::create(&mut pool, entry, crate::section::FormatVersion::V1, 1, ContainerFormat::Encase6)
                .unwrap();
        writer
            .write_header(&mut pool, &HeaderValues::new(), HeaderDialect::Header)
            .unwrap();

        let media_values = MediaValues::new(chunk_plain.len() as u64, 512, 1, ContainerFormat::Encase6).unwrap();
        writer.write_volume(&mut pool, &media_values).unwrap();

        let mut packed = crate::chunk_codec::pack(
            chunk_plain,
            PackPolicy {
                pattern_fill_detect: false,
                compress_empty: false,
                level: crate::codec::CompressionLevel::None,
                have_checksum: true,
                pack_format: PackFormat::V1,
            },
        )
        .unwrap();
        if corrupt {
            packed.bytes[0] ^= 0xff;
        }

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
        let mut hashes = crate::header_values::HashValues::new();
        hashes.set(
            "md5",
            {
                use md5::Digest as _;
                let mut h = md5::Md5::new();
                h.update(chunk_plain);
                crate::codec::hash_to_hex(&h.finalize())
            },
        );
        writer.write_hash(&mut pool, &hashes).unwrap();
        writer.finalize(&mut pool, true).unwrap();
        path
    }

    #[test]
    fn clean_image_verifies_with_matching_digest() {
        let dir = tempfile::tempdir().unwrap();
        let plain: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        let path = write_image(dir.path(), &plain, false);
        let mut handle = Handle::open(path.to_str().unwrap()).unwrap();

        let mut workflow = VerifyWorkflow::new(&mut handle, vec![DigestAlgorithm::Md5], Arc::new(AtomicBool::new(false)));
        let report = workflow.run().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.chunks_checked, 1);
        assert_eq!(workflow.state(), VerifyState::Done);
    }

    #[test]
    fn corrupted_chunk_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let plain = vec![0x11u8; 512];
        let path = write_image(dir.path(), &plain, true);
        let mut handle = Handle::open(path.to_str().unwrap()).unwrap();

        let mut workflow = VerifyWorkflow::new(&mut handle, vec![DigestAlgorithm::Md5], Arc::new(AtomicBool::new(false)));
        let report = workflow.run().unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.corrupted_chunks.len(), 1);
        assert_eq!(report.corrupted_chunks[0].chunk_number, 0);
    }

    #[test]
    fn abort_mid_read_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let plain = vec![0x22u8; 512];
        let path = write_image(dir.path(), &plain, false);
        let mut handle = Handle::open(path.to_str().unwrap()).unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let mut workflow = VerifyWorkflow::new(&mut handle, vec![DigestAlgorithm::Md5], flag);
        let err = workflow.run().unwrap_err();
        assert!(matches!(err, EwfError::Aborted));
    }
}
