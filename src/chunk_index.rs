//! **ChunkIndex** — two-tier sparse index from global chunk number to the
//! segment/chunk-group/descriptor that holds it (spec §4.5).
//!
//! Tier A (chunk index -> segment number, chunk-group index) and Tier B
//! (chunk-group -> `ChunkDescriptor`) are kept as separate maps rather than
//! the single flattened `BlockTree` the `other_examples` independent EWF
//! reader uses, because spec §8's "Table vs table2" and "Segment boundary"
//! properties need to be exercised against one tier at a time. The
//! `fill_v1`/`fill_v2`/`correct_v1` algorithms generalize the teacher's
//! `EWF::parse_table` (MSB-compressed-bit decoding of 32-bit offsets).

use std::collections::BTreeMap;

use crate::chunk_codec::RangeFlags;
use crate::error::{EwfError, Result};
use crate::file_pool::PoolEntry;
use crate::section::{decode_table_entry_v1, TableEntryV2};

/// A fully resolved chunk location, tier B's value type.
#[derive(Debug, Clone, Copy)]
pub struct ChunkDescriptor {
    pub file_pool_entry: PoolEntry,
    pub data_offset: u64,
    pub data_size: u64,
    pub flags: RangeFlags,
    /// For v2 pattern-fill entries the 8-byte pattern is stored inline in
    /// the table entry rather than in the `sectors` stream (spec §9); when
    /// set, `data_offset`/`data_size` are meaningless and this is used
    /// instead.
    pub inline_pattern: Option<[u8; 8]>,
}

/// Tier A entry: which segment + chunk group a global chunk index lives in.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLocation {
    pub segment_number: u16,
    pub chunk_group: usize,
}

#[derive(Default, Clone)]
struct ChunkGroupIndex {
    first_chunk_index: u64,
    descriptors: Vec<ChunkDescriptor>,
}

/// The two-tier sparse index.
#[derive(Default, Clone)]
pub struct ChunkIndex {
    tier_a: BTreeMap<u64, ChunkLocation>,
    /// Keyed by `(segment_number, chunk_group_index)`.
    tier_b: BTreeMap<(u16, usize), ChunkGroupIndex>,
    /// Chunks overridden by a delta segment always win (spec §4.5).
    delta: BTreeMap<u64, ChunkDescriptor>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        ChunkIndex::default()
    }

    /// Registers a resolved chunk group, wiring tier A and tier B together.
    pub fn insert_chunk_group(
        &mut self,
        segment_number: u16,
        chunk_group: usize,
        first_chunk_index: u64,
        descriptors: Vec<ChunkDescriptor>,
    ) {
        for (i, _) in descriptors.iter().enumerate() {
            self.tier_a.insert(
                first_chunk_index + i as u64,
                ChunkLocation {
                    segment_number,
                    chunk_group,
                },
            );
        }
        self.tier_b.insert(
            (segment_number, chunk_group),
            ChunkGroupIndex {
                first_chunk_index,
                descriptors,
            },
        );
    }

    /// Registers (or overwrites) a delta-segment chunk; it always takes
    /// precedence over the primary-segment resolution.
    pub fn insert_delta(&mut self, chunk_index: u64, descriptor: ChunkDescriptor) {
        let mut descriptor = descriptor;
        descriptor.flags.insert(RangeFlags::IS_DELTA);
        self.delta.insert(chunk_index, descriptor);
    }

    pub fn resolve(&self, chunk_index: u64) -> Result<ChunkDescriptor> {
        if let Some(d) = self.delta.get(&chunk_index) {
            return Ok(*d);
        }
        let location = self
            .tier_a
            .get(&chunk_index)
            .ok_or_else(|| EwfError::OutOfRange(format!("no such chunk: {chunk_index}")))?;
        let group = self
            .tier_b
            .get(&(location.segment_number, location.chunk_group))
            .ok_or_else(|| {
                EwfError::InvalidData("chunk group referenced by tier A is missing".into())
            })?;
        let local = (chunk_index - group.first_chunk_index) as usize;
        group
            .descriptors
            .get(local)
            .copied()
            .ok_or_else(|| EwfError::OutOfRange(format!("no such chunk: {chunk_index}")))
    }

    pub fn len(&self) -> usize {
        self.tier_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tier_a.is_empty()
    }
}

/// Raw v1 table entry plus its absolute byte offset, as read off disk.
#[derive(Debug, Clone, Copy)]
pub struct RawTableEntryV1 {
    pub raw: u32,
}

/// `fill_v1` — derives each entry's absolute offset, size and flags from
/// the "next offset minus current offset" scheme, including the EnCase 6.7
/// 2 GiB overflow heuristic (spec §4.5).
///
/// `table_start` / `table_end` bound the `sectors` payload the entries'
/// offsets are relative to (not the `table` section itself), used to size
/// the last entry. `last_entry_uses_start` selects which bound the last
/// entry uses (`table_start` for original EWF/EWF-S01, `table_end`
/// otherwise), per spec §4.5.
pub fn fill_v1(
    entries: &[RawTableEntryV1],
    base_offset: u64,
    table_start: u64,
    table_end: u64,
    last_entry_uses_start: bool,
    file_pool_entry: PoolEntry,
) -> Vec<ChunkDescriptor> {
    let n = entries.len();
    let mut out = Vec::with_capacity(n);
    let mut overflow_active = false;

    for i in 0..n {
        let (current_off, current_compressed) = decode_table_entry_v1(entries[i].raw);
        let current_abs = base_offset + current_off as u64;

        let mut flags = RangeFlags::empty();
        if current_compressed {
            flags.insert(RangeFlags::IS_COMPRESSED);
        } else {
            flags.insert(RangeFlags::HAS_CHECKSUM);
        }

        let size = if i + 1 < n {
            let (mut next_off, _) = decode_table_entry_v1(entries[i + 1].raw);
            if overflow_active {
                // Once the overflow quirk triggers we stop trusting the MSB
                // compressed bit and treat the remaining offsets as plain
                // unsigned 32-bit values.
                next_off = entries[i + 1].raw;
            }
            if (next_off as u64) < current_off as u64 {
                if (entries[i + 1].raw as u64) < current_off as u64 {
                    flags.insert(RangeFlags::IS_CORRUPTED);
                    (next_off as i64 - current_off as i64).unsigned_abs()
                } else {
                    overflow_active = true;
                    (entries[i + 1].raw as i64 - current_off as i64).unsigned_abs()
                }
            } else {
                next_off as u64 - current_off as u64
            }
        } else {
            let bound = if last_entry_uses_start {
                table_start
            } else {
                table_end
            };
            bound.saturating_sub(current_abs)
        };

        out.push(ChunkDescriptor {
            file_pool_entry,
            data_offset: current_abs,
            data_size: size,
            flags,
            inline_pattern: None,
        });
    }
    out
}

/// `fill_v2` — entries are explicit `(offset, size, flags)`. When
/// `USES_PATTERN_FILL` is set, the 8-byte pattern is stored in the entry's
/// `offset` field itself (spec §9), not as a data-stream byte range.
pub fn fill_v2(entries: &[TableEntryV2], file_pool_entry: PoolEntry) -> Vec<ChunkDescriptor> {
    use crate::section::{V2_FLAG_COMPRESSED, V2_FLAG_HAS_CHECKSUM, V2_FLAG_PATTERN_FILL};

    entries
        .iter()
        .map(|entry| {
            let mut flags = RangeFlags::empty();
            if entry.flags & V2_FLAG_COMPRESSED != 0 {
                flags.insert(RangeFlags::IS_COMPRESSED);
            }
            if entry.flags & V2_FLAG_HAS_CHECKSUM != 0 {
                flags.insert(RangeFlags::HAS_CHECKSUM);
            }
            if entry.flags & V2_FLAG_PATTERN_FILL != 0 {
                flags.insert(RangeFlags::USES_PATTERN_FILL);
                return ChunkDescriptor {
                    file_pool_entry,
                    data_offset: 0,
                    data_size: 0,
                    flags,
                    inline_pattern: Some(entry.offset.to_le_bytes()),
                };
            }
            ChunkDescriptor {
                file_pool_entry,
                data_offset: entry.offset,
                data_size: entry.size as u64,
                flags,
                inline_pattern: None,
            }
        })
        .collect()
}

/// `correct_v1` — reconciles a primary table's descriptors against its
/// table2 backup: prefer whichever side is not corrupted/tainted, and
/// upgrade a tainted entry to authoritative once the other side agrees.
pub fn correct_v1(
    primary: &[ChunkDescriptor],
    backup: &[ChunkDescriptor],
) -> Vec<ChunkDescriptor> {
    primary
        .iter()
        .zip(backup.iter())
        .map(|(p, b)| {
            let p_bad = p.flags.contains(RangeFlags::IS_CORRUPTED);
            let b_bad = b.flags.contains(RangeFlags::IS_CORRUPTED);
            match (p_bad, b_bad) {
                (false, _) if p.data_offset == b.data_offset && p.data_size == b.data_size => *p,
                (false, true) => *p,
                (true, false) => *b,
                (false, false) => {
                    // Disagreement between two "clean" reads: taint both and
                    // prefer the primary, as the primary is written first.
                    let mut tainted = *p;
                    tainted.flags.insert(RangeFlags::IS_TAINTED);
                    tainted
                }
                (true, true) => {
                    let mut both_bad = *p;
                    both_bad.flags.insert(RangeFlags::IS_CORRUPTED);
                    both_bad
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u32, compressed: bool) -> RawTableEntryV1 {
        RawTableEntryV1 {
            raw: crate::section::encode_table_entry_v1(offset, compressed),
        }
    }

    #[test]
    fn fill_v1_derives_sizes_from_next_offset() {
        let entries = vec![entry(0, false), entry(100, false), entry(250, true)];
        let descriptors = fill_v1(&entries, 1000, 2000, 2400, false, 0);
        assert_eq!(descriptors[0].data_offset, 1000);
        assert_eq!(descriptors[0].data_size, 100);
        assert_eq!(descriptors[1].data_offset, 1100);
        assert_eq!(descriptors[1].data_size, 150);
        assert_eq!(descriptors[2].data_offset, 1250);
        assert_eq!(descriptors[2].data_size, 2400 - 1250);
        assert!(descriptors[2].flags.contains(RangeFlags::IS_COMPRESSED));
    }

    #[test]
    fn fill_v2_extracts_inline_pattern() {
        use crate::section::{TableEntryV2, V2_FLAG_PATTERN_FILL};
        let pattern = 0x5858_5858_5858_5858u64;
        let entries = vec![TableEntryV2 {
            offset: pattern,
            size: 0,
            flags: V2_FLAG_PATTERN_FILL,
        }];
        let descriptors = fill_v2(&entries, 0);
        assert!(descriptors[0].flags.contains(RangeFlags::USES_PATTERN_FILL));
        assert_eq!(descriptors[0].inline_pattern, Some([0x58; 8]));
    }

    #[test]
    fn chunk_index_resolves_across_groups() {
        let mut index = ChunkIndex::new();
        let group0 = vec![
            ChunkDescriptor {
                file_pool_entry: 0,
                data_offset: 100,
                data_size: 50,
                flags: RangeFlags::empty(),
                inline_pattern: None,
            },
            ChunkDescriptor {
                file_pool_entry: 0,
                data_offset: 150,
                data_size: 50,
                flags: RangeFlags::empty(),
                inline_pattern: None,
            },
        ];
        index.insert_chunk_group(1, 0, 0, group0);
        let resolved = index.resolve(1).unwrap();
        assert_eq!(resolved.data_offset, 150);
    }

    #[test]
    fn delta_chunk_always_wins() {
        let mut index = ChunkIndex::new();
        index.insert_chunk_group(
            1,
            0,
            0,
            vec![ChunkDescriptor {
                file_pool_entry: 0,
                data_offset: 10,
                data_size: 5,
                flags: RangeFlags::empty(),
                inline_pattern: None,
            }],
        );
        index.insert_delta(
            0,
            ChunkDescriptor {
                file_pool_entry: 1,
                data_offset: 999,
                data_size: 5,
                flags: RangeFlags::empty(),
                inline_pattern: None,
            },
        );
        let resolved = index.resolve(0).unwrap();
        assert_eq!(resolved.data_offset, 999);
        assert!(resolved.flags.contains(RangeFlags::IS_DELTA));
    }

    #[test]
    fn correct_v1_prefers_clean_backup() {
        let mut corrupted = ChunkDescriptor {
            file_pool_entry: 0,
            data_offset: 0,
            data_size: 0,
            flags: RangeFlags::empty(),
            inline_pattern: None,
        };
        corrupted.flags.insert(RangeFlags::IS_CORRUPTED);
        let clean = ChunkDescriptor {
            file_pool_entry: 0,
            data_offset: 500,
            data_size: 64,
            flags: RangeFlags::empty(),
            inline_pattern: None,
        };
        let result = correct_v1(&[corrupted], &[clean]);
        assert_eq!(result[0].data_offset, 500);
        assert!(!result[0].flags.contains(RangeFlags::IS_CORRUPTED));
    }
}
