//! **SessionRange / TrackRange** — optical-media sector ranges (spec §3),
//! and the **ChecksumError / AcquiryError** coalesced range lists (spec §3,
//! §8 "Coalescing").
//!
//! No teacher precedent exists for these (the teacher never reads optical
//! sessions or records per-sector errors); modeled as plain sector-range
//! structs in the same minimal style the teacher uses for `Chunk`/`ChunkCache`.

use crate::codec::{le_read_u32, le_write_u32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub start_sector: u64,
    pub number_of_sectors: u64,
}

impl SectorRange {
    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.number_of_sectors
    }

    fn touches(&self, other: &SectorRange) -> bool {
        self.start_sector <= other.end_sector() && other.start_sector <= self.end_sector()
    }
}

pub type SessionRange = SectorRange;
pub type TrackRange = SectorRange;

/// A coalesced, non-overlapping, sorted list of sector ranges. Used for both
/// `checksum_errors` and `acquiry_errors` (spec §3/§8).
#[derive(Debug, Clone, Default)]
pub struct RangeList {
    ranges: Vec<SectorRange>,
}

impl RangeList {
    pub fn new() -> Self {
        RangeList { ranges: Vec::new() }
    }

    /// Adds `range`, merging with any touching/overlapping existing range
    /// so the list remains a coalesced union (spec §8 "Coalescing").
    pub fn add(&mut self, range: SectorRange) {
        let mut merged = range;
        self.ranges.retain(|existing| {
            if merged.touches(existing) {
                merged = SectorRange {
                    start_sector: merged.start_sector.min(existing.start_sector),
                    number_of_sectors: merged.end_sector().max(existing.end_sector())
                        - merged.start_sector.min(existing.start_sector),
                };
                false
            } else {
                true
            }
        });
        let insert_at = self
            .ranges
            .iter()
            .position(|r| r.start_sector > merged.start_sector)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(insert_at, merged);
    }

    pub fn ranges(&self) -> &[SectorRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }
}

/// Session/track section payload codec (spec §4.4): `u32 number_of_entries |
/// u32 unknown | entry[number_of_entries] { u32 flags | u32 first_sector |
/// u8 padding[24] } | u32 checksum`. Flag bit 0 distinguishes track entries
/// from session entries.
pub const SESSION_ENTRY_FLAG_TRACK: u32 = 0b1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub flags: u32,
    pub first_sector: u32,
}

pub fn encode_session_section(entries: &[SessionEntry]) -> Vec<u8> {
    use crate::codec::adler32;

    let mut buf = Vec::new();
    le_write_u32(entries.len() as u32, &mut buf);
    le_write_u32(0, &mut buf);
    for entry in entries {
        le_write_u32(entry.flags, &mut buf);
        le_write_u32(entry.first_sector, &mut buf);
        buf.extend_from_slice(&[0u8; 24]);
    }
    let checksum = adler32(1, &buf);
    le_write_u32(checksum, &mut buf);
    buf
}

pub fn decode_session_section(bytes: &[u8]) -> crate::error::Result<Vec<SessionEntry>> {
    use crate::codec::adler32;
    use crate::error::{EwfError, IntegrityKind};

    if bytes.len() < 8 {
        return Err(EwfError::InvalidData("session section truncated".into()));
    }
    let number_of_entries = le_read_u32(&bytes[0..4]) as usize;
    let entries_start = 8;
    let entry_size = 32;
    let entries_end = entries_start + number_of_entries * entry_size;
    if bytes.len() < entries_end + 4 {
        return Err(EwfError::InvalidData(
            "session section shorter than its declared entry count".into(),
        ));
    }
    let stored_checksum = le_read_u32(&bytes[entries_end..entries_end + 4]);
    let computed = adler32(1, &bytes[..entries_end]);
    if stored_checksum != computed {
        return Err(EwfError::integrity(
            IntegrityKind::TableChecksum,
            "session section checksum mismatch",
        ));
    }
    let mut out = Vec::with_capacity(number_of_entries);
    for i in 0..number_of_entries {
        let base = entries_start + i * entry_size;
        out.push(SessionEntry {
            flags: le_read_u32(&bytes[base..base + 4]),
            first_sector: le_read_u32(&bytes[base + 4..base + 8]),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_overlapping_and_adjacent_ranges() {
        let mut list = RangeList::new();
        list.add(SectorRange {
            start_sector: 0,
            number_of_sectors: 10,
        });
        list.add(SectorRange {
            start_sector: 10,
            number_of_sectors: 5,
        }); // adjacent
        list.add(SectorRange {
            start_sector: 100,
            number_of_sectors: 5,
        }); // disjoint

        assert_eq!(list.len(), 2);
        assert_eq!(list.ranges()[0].start_sector, 0);
        assert_eq!(list.ranges()[0].number_of_sectors, 15);
        assert_eq!(list.ranges()[1].start_sector, 100);
    }

    #[test]
    fn session_section_roundtrip() {
        let entries = vec![
            SessionEntry {
                flags: 0,
                first_sector: 0,
            },
            SessionEntry {
                flags: 0,
                first_sector: 2048,
            },
        ];
        let bytes = encode_session_section(&entries);
        let decoded = decode_session_section(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].first_sector, 2048);
    }

    #[test]
    fn session_section_detects_checksum_corruption() {
        let entries = vec![SessionEntry {
            flags: 0,
            first_sector: 0,
        }];
        let mut bytes = encode_session_section(&entries);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(decode_session_section(&bytes).is_err());
    }
}
