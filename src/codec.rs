//! **CodecLayer** — endianness, checksums and the deflate pipeline.
//!
//! Every other module in the engine goes through here rather than calling
//! `flate2`/`crc32fast` directly, mirroring the way the teacher's `ewf.rs`
//! funneled all decompression through a single `ZlibDecoder` call site.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

use crate::error::{EwfError, Result};

/// Compression effort requested by a write policy. `None` still allows the
/// caller to force compression of detected empty/pattern chunks per spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Default,
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::Best => Compression::best(),
        }
    }
}

/// Adler-32 checksum per RFC 1950, seeded with `seed` (pass `1` for a fresh
/// checksum, as zlib itself does).
pub fn adler32(seed: u32, bytes: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a = seed & 0xffff;
    let mut b = (seed >> 16) & 0xffff;
    for &byte in bytes {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// CRC-32 (IEEE) checksum. The format itself never authenticates a section
/// with this (see spec §9: "the source toggles between Adler32 and SHA-256");
/// exposed for callers that need a plain CRC-32 for their own purposes.
pub fn crc32(seed: u32, bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(seed);
    hasher.update(bytes);
    hasher.finalize()
}

/// Deflate-compress `input` at the given level, returning the packed bytes.
pub fn deflate_compress(input: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(input, level.to_flate2());
    // Compressed output can exceed the input size for incompressible data;
    // callers that pre-size a buffer should use `max_packed_size`.
    let mut out = Vec::with_capacity(max_packed_size(input.len()));
    encoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::InvalidData(format!("deflate compression failed: {e}")))?;
    Ok(out)
}

/// Deflate-decompress `input`, returning the plain bytes.
pub fn deflate_decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::InvalidData(format!("invalid compressed data: {e}")))?;
    Ok(out)
}

/// Worst-case packed size for an `input_len`-byte chunk, per spec §4.2's
/// numeric edge case note.
pub fn max_packed_size(input_len: usize) -> usize {
    input_len + input_len / 1000 + 16
}

pub fn le_read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes(bytes[..2].try_into().unwrap())
}

pub fn le_read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().unwrap())
}

pub fn le_read_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}

pub fn le_write_u16(value: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn le_write_u32(value: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn le_write_u64(value: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Lowercase hex encoding of `bytes`.
pub fn hash_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_matches_known_vector() {
        // "Wikipedia" -> 0x11E60398 is the textbook Adler-32 test vector.
        assert_eq!(adler32(1, b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn adler32_empty_input_is_seed() {
        assert_eq!(adler32(1, b""), 1);
    }

    #[test]
    fn deflate_roundtrip() {
        let input = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let packed = deflate_compress(&input, CompressionLevel::Best).unwrap();
        let plain = deflate_decompress(&packed).unwrap();
        assert_eq!(plain, input);
    }

    #[test]
    fn deflate_decompress_rejects_garbage() {
        let garbage = vec![0xffu8; 16];
        assert!(deflate_decompress(&garbage).is_err());
    }

    #[test]
    fn endian_roundtrip() {
        let mut buf = Vec::new();
        le_write_u32(0xdeadbeef, &mut buf);
        assert_eq!(le_read_u32(&buf), 0xdeadbeef);
    }

    #[test]
    fn hex_encoding_is_lowercase() {
        assert_eq!(hash_to_hex(&[0xAB, 0xCD]), "abcd");
    }
}
