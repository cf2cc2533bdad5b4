//! **MediaValues** — invariants over media geometry (spec §3).
//!
//! Generalizes the teacher's `EwfVolumeSection` (`chunk_count`,
//! `sector_per_chunk`, `bytes_per_sector`, `total_sector_count`,
//! `chunk_size()`, `max_offset()`) with the full field set the format needs:
//! media type/flags, compression method/level, a set-identifier GUID and the
//! segment-file format dialect.

use crate::error::{EwfError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    Logical,
    Memory,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaFlags {
    pub physical: bool,
    pub logical: bool,
    pub write_protected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Deflate,
    /// Reserved per spec §3; no segment dialect in this engine emits it.
    Bzip2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    EmptyBlock,
    Fast,
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Smart,
    Ftk,
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Encase7,
    Linen5,
    Linen6,
    Ewfx,
    Logical,
}

impl ContainerFormat {
    /// The major section-descriptor/table dialect this format uses.
    pub fn major_version(self) -> u8 {
        match self {
            ContainerFormat::Ewfx => 2,
            _ => 1,
        }
    }
}

/// Media geometry and acquisition metadata shared by the whole container.
#[derive(Debug, Clone)]
pub struct MediaValues {
    pub media_size: u64,
    pub bytes_per_sector: u32,
    pub sectors_per_chunk: u32,
    pub number_of_sectors: u64,
    pub number_of_chunks: u64,
    pub media_type: MediaType,
    pub media_flags: MediaFlags,
    pub compression_method: CompressionMethod,
    pub compression_level: CompressionLevel,
    pub set_identifier: [u8; 16],
    pub format: ContainerFormat,
    pub error_granularity: u32,
}

impl MediaValues {
    pub fn new(
        media_size: u64,
        bytes_per_sector: u32,
        sectors_per_chunk: u32,
        format: ContainerFormat,
    ) -> Result<Self> {
        if bytes_per_sector == 0 || sectors_per_chunk == 0 {
            return Err(EwfError::InvalidArgument(
                "bytes_per_sector and sectors_per_chunk must be non-zero".into(),
            ));
        }
        let chunk_size = sectors_per_chunk as u64 * bytes_per_sector as u64;
        let number_of_sectors = (media_size + bytes_per_sector as u64 - 1) / bytes_per_sector as u64;
        let number_of_chunks = (media_size + chunk_size - 1) / chunk_size;

        Ok(MediaValues {
            media_size,
            bytes_per_sector,
            sectors_per_chunk,
            number_of_sectors,
            number_of_chunks,
            media_type: MediaType::Fixed,
            media_flags: MediaFlags {
                physical: true,
                logical: false,
                write_protected: false,
            },
            compression_method: CompressionMethod::Deflate,
            compression_level: CompressionLevel::Fast,
            set_identifier: [0u8; 16],
            format,
            error_granularity: sectors_per_chunk,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.sectors_per_chunk as u64 * self.bytes_per_sector as u64
    }

    pub fn max_offset(&self) -> u64 {
        self.number_of_sectors * self.bytes_per_sector as u64
    }

    /// Validates the cross-field invariants of spec §3.
    pub fn validate(&self) -> Result<()> {
        let chunk_size = self.chunk_size();
        if chunk_size == 0 {
            return Err(EwfError::InvalidArgument("chunk_size must be > 0".into()));
        }
        if self.sectors_per_chunk as u64 * self.bytes_per_sector as u64 != chunk_size {
            return Err(EwfError::InvalidArgument(
                "chunk_size must equal sectors_per_chunk * bytes_per_sector".into(),
            ));
        }
        if self.number_of_chunks * chunk_size < self.media_size {
            return Err(EwfError::InvalidArgument(
                "number_of_chunks * chunk_size must be >= media_size".into(),
            ));
        }
        if self.format == ContainerFormat::Ewfx && self.number_of_chunks > u32::MAX as u64 {
            return Err(EwfError::CapacityExceeded(
                "number_of_chunks exceeds 2^32-1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_product_of_geometry() {
        let mv = MediaValues::new(3 * 1024 * 1024, 512, 64, ContainerFormat::Encase7).unwrap();
        assert_eq!(mv.chunk_size(), 64 * 512);
    }

    #[test]
    fn number_of_chunks_covers_media_size() {
        let mv = MediaValues::new(4 * 512, 512, 64, ContainerFormat::Encase7).unwrap();
        assert!(mv.number_of_chunks * mv.chunk_size() >= mv.media_size);
        assert_eq!(mv.number_of_chunks, 1);
    }

    #[test]
    fn rejects_zero_geometry() {
        assert!(MediaValues::new(100, 0, 64, ContainerFormat::Encase7).is_err());
        assert!(MediaValues::new(100, 512, 0, ContainerFormat::Encase7).is_err());
    }

    #[test]
    fn validate_catches_inconsistent_chunk_size() {
        let mut mv = MediaValues::new(2048, 512, 4, ContainerFormat::Encase7).unwrap();
        mv.sectors_per_chunk = 3;
        assert!(mv.validate().is_err());
    }
}
