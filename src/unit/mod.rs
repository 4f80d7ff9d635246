//! Single-file key/value store used as one shard of the sharded backend.
//!
//! A unit is an append-only log of checksummed [`Record`]s; the last record
//! for a key holds its value. The format has no concurrency control of its
//! own: callers must hold the unit's advisory lock for the whole
//! open/read/write/close cycle.
//!
//! # Cost
//!
//! A [`UnitIndex`] maps each key to the location of its newest value and
//! remembers how much of the file it has decoded. Handing the index back on
//! the next open means only records appended since then (by this or any
//! other process) are read and checksummed. A lookup is then one hash lookup
//! plus one positioned read of the value, and an append is one positioned
//! write. Only a cold open decodes the whole log.

pub mod record;

use crate::error::{BenchError, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};

pub use record::{Record, RecordRef, HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueLocation {
    offset: u64,
    len: u64,
}

/// Decoded view of a unit file's valid prefix, reusable across opens.
///
/// Bytes inside the valid prefix are never rewritten, so the index stays
/// correct as long as it is applied to the same file. A different inode or
/// a file shorter than the indexed prefix discards it.
#[derive(Debug, Clone, Default)]
pub struct UnitIndex {
    identity: Option<(u64, u64)>,
    valid_len: u64,
    records: u64,
    latest: HashMap<Vec<u8>, ValueLocation>,
}

impl UnitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of well-formed records decoded so far.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Records decoded so far, including superseded ones.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    fn reset(&mut self, identity: (u64, u64)) {
        *self = UnitIndex {
            identity: Some(identity),
            ..UnitIndex::default()
        };
    }

    fn note(&mut self, key: &[u8], location: ValueLocation) {
        match self.latest.get_mut(key) {
            Some(slot) => *slot = location,
            None => {
                self.latest.insert(key.to_vec(), location);
            }
        }
        self.records += 1;
    }
}

/// An open unit file and the index of its valid records.
pub struct UnitFile {
    path: PathBuf,
    file: File,
    file_len: u64,
    index: UnitIndex,
}

impl UnitFile {
    /// Open an existing unit for lookups.
    pub fn open_read(path: &Path) -> Result<Self> {
        Self::open_read_with(path, UnitIndex::new())
    }

    /// Open an existing unit, resuming from a previously returned index.
    pub fn open_read_with(path: &Path, index: UnitIndex) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::load(path, file, index)
    }

    /// Open a unit for reading and writing, creating it if missing.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Self::open_or_create_with(path, UnitIndex::new())
    }

    pub fn open_or_create_with(path: &Path, index: UnitIndex) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::load(path, file, index)
    }

    fn load(path: &Path, file: File, mut index: UnitIndex) -> Result<Self> {
        let metadata = file.metadata()?;
        let identity = (metadata.dev(), metadata.ino());

        if index.identity != Some(identity) || metadata.len() < index.valid_len {
            if index.identity.is_some() {
                tracing::debug!("Unit {:?} was replaced, rebuilding its index", path);
            }
            index.reset(identity);
        }

        let mut unit = Self {
            path: path.to_path_buf(),
            file,
            file_len: metadata.len(),
            index,
        };
        unit.catch_up()?;
        Ok(unit)
    }

    /// Decode records appended since the index was last brought up to date.
    fn catch_up(&mut self) -> Result<()> {
        let start = self.index.valid_len;
        if self.file_len <= start {
            return Ok(());
        }

        let mut tail = Vec::with_capacity((self.file_len - start) as usize);
        self.file.seek(SeekFrom::Start(start))?;
        (&mut self.file)
            .take(self.file_len - start)
            .read_to_end(&mut tail)?;
        self.file_len = start + tail.len() as u64;

        let mut offset = 0usize;
        while offset < tail.len() {
            match RecordRef::parse(&tail[offset..]) {
                Ok((record, used)) => {
                    let location = ValueLocation {
                        offset: start + (offset + record.value_offset()) as u64,
                        len: record.value.len() as u64,
                    };
                    self.index.note(record.key, location);
                    offset += used;
                }
                Err(e) => {
                    tracing::warn!(
                        "Unit corruption detected at offset {} in {:?}: {}",
                        start + offset as u64,
                        self.path,
                        e
                    );
                    break;
                }
            }
        }

        self.index.valid_len = start + offset as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest value stored for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(location) = self.index.latest.get(key) else {
            return Ok(None);
        };

        let mut value = vec![0u8; location.len as usize];
        self.file.read_exact_at(&mut value, location.offset)?;
        Ok(Some(value))
    }

    /// Append an assignment of `value` to `key`.
    ///
    /// A torn tail left by an interrupted writer is cut off first so the new
    /// record stays reachable.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let bytes = Record::new(key, value).serialize()?;
        let at = self.index.valid_len;

        if self.file_len > at {
            tracing::warn!(
                "Truncating {} bytes of torn data at offset {} in {:?}",
                self.file_len - at,
                at,
                self.path
            );
            self.file.set_len(at)?;
        }

        self.file.write_all_at(&bytes, at)?;
        self.index.note(
            key,
            ValueLocation {
                offset: at + (HEADER_SIZE + key.len()) as u64,
                len: value.len() as u64,
            },
        );
        self.index.valid_len = at + bytes.len() as u64;
        self.file_len = self.index.valid_len;
        Ok(())
    }

    /// Number of distinct keys in the unit.
    pub fn len(&self) -> usize {
        self.index.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.latest.is_empty()
    }

    /// Records in the unit, including superseded ones.
    pub fn record_count(&self) -> u64 {
        self.index.records
    }

    /// Fail on any undecodable bytes instead of skipping them.
    pub fn verify(&self) -> Result<()> {
        if self.index.valid_len < self.file_len {
            return Err(BenchError::CorruptedData {
                file: self.path.clone(),
                offset: self.index.valid_len,
            });
        }
        Ok(())
    }

    /// Close the file and keep the index for the next open.
    pub fn into_index(self) -> UnitIndex {
        self.index
    }
}
