//! **FilePool** — a bounded LRU of open segment-file handles (spec §4.3).
//!
//! Grounded in `examples/other_examples`'s independent EWF reader, which
//! keeps an `LruCache<u16, EwfFile>` segment cache of capacity 16 and
//! reopens lazily on eviction; this module generalizes that idea to a
//! read/write pool addressed by small integer "pool entry" ids rather than
//! segment numbers directly, since delta segments need pool entries of
//! their own.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub type PoolEntry = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

struct Slot {
    path: PathBuf,
    mode: OpenMode,
    handle: Option<File>,
    /// Monotonically increasing touch counter used for LRU eviction.
    last_used: u64,
}

/// Bounded pool of open file descriptors. Eviction closes the OS handle but
/// keeps the path around, so the next access transparently reopens and
/// re-seeks (spec §4.3).
pub struct FilePool {
    capacity: usize,
    slots: HashMap<PoolEntry, Slot>,
    next_entry: PoolEntry,
    open_count: usize,
    clock: u64,
}

impl FilePool {
    pub fn new(capacity: usize) -> Self {
        FilePool {
            capacity: capacity.max(1),
            slots: HashMap::new(),
            next_entry: 0,
            open_count: 0,
            clock: 0,
        }
    }

    /// Registers `path` for future access without opening it yet.
    pub fn register(&mut self, path: impl Into<PathBuf>, mode: OpenMode) -> PoolEntry {
        let entry = self.next_entry;
        self.next_entry += 1;
        self.slots.insert(
            entry,
            Slot {
                path: path.into(),
                mode,
                handle: None,
                last_used: 0,
            },
        );
        entry
    }

    fn open_handle(path: &Path, mode: OpenMode) -> Result<File> {
        let file = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path)?,
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .read(true)
                .open(path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };
        Ok(file)
    }

    fn evict_one(&mut self) {
        if let Some((&entry, _)) = self
            .slots
            .iter()
            .filter(|(_, s)| s.handle.is_some())
            .min_by_key(|(_, s)| s.last_used)
        {
            if let Some(slot) = self.slots.get_mut(&entry) {
                slot.handle = None;
                self.open_count -= 1;
            }
        }
    }

    fn ensure_open(&mut self, entry: PoolEntry) -> Result<()> {
        let needs_open = self
            .slots
            .get(&entry)
            .map(|s| s.handle.is_none())
            .unwrap_or(false);
        if needs_open {
            if self.open_count >= self.capacity {
                self.evict_one();
            }
            let slot = self
                .slots
                .get(&entry)
                .expect("pool entry must be registered before use");
            let handle = Self::open_handle(&slot.path, slot.mode)?;
            let slot = self.slots.get_mut(&entry).unwrap();
            slot.handle = Some(handle);
            self.open_count += 1;
        }
        self.clock += 1;
        let clock = self.clock;
        if let Some(slot) = self.slots.get_mut(&entry) {
            slot.last_used = clock;
        }
        Ok(())
    }

    pub fn seek(&mut self, entry: PoolEntry, pos: SeekFrom) -> Result<u64> {
        self.ensure_open(entry)?;
        let slot = self.slots.get_mut(&entry).unwrap();
        Ok(slot.handle.as_mut().unwrap().seek(pos)?)
    }

    pub fn read(&mut self, entry: PoolEntry, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open(entry)?;
        let slot = self.slots.get_mut(&entry).unwrap();
        Ok(slot.handle.as_mut().unwrap().read(buf)?)
    }

    pub fn read_exact(&mut self, entry: PoolEntry, buf: &mut [u8]) -> Result<()> {
        self.ensure_open(entry)?;
        let slot = self.slots.get_mut(&entry).unwrap();
        slot.handle.as_mut().unwrap().read_exact(buf)?;
        Ok(())
    }

    pub fn write(&mut self, entry: PoolEntry, buf: &[u8]) -> Result<usize> {
        self.ensure_open(entry)?;
        let slot = self.slots.get_mut(&entry).unwrap();
        Ok(slot.handle.as_mut().unwrap().write(buf)?)
    }

    pub fn flush(&mut self, entry: PoolEntry) -> Result<()> {
        if let Some(slot) = self.slots.get_mut(&entry) {
            if let Some(handle) = slot.handle.as_mut() {
                handle.flush()?;
            }
        }
        Ok(())
    }

    /// Closes the descriptor (if open) but keeps the path registered.
    pub fn close(&mut self, entry: PoolEntry) {
        if let Some(slot) = self.slots.get_mut(&entry) {
            if slot.handle.take().is_some() {
                self.open_count -= 1;
            }
        }
    }

    pub fn path_of(&self, entry: PoolEntry) -> Option<&Path> {
        self.slots.get(&entry).map(|s| s.path.as_path())
    }
}
