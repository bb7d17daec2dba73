//! Directory entry record
//!
//! ## Record Format (128 bytes)
//! ```text
//! 0x00  name, UTF-16LE, NUL terminated (64 bytes)
//! 0x40  name length in bytes including the NUL (u16, 0 = free slot)
//! 0x42  type (1 storage, 2 stream, 5 root)
//! 0x43  colour
//! 0x44  previous sibling
//! 0x48  next sibling
//! 0x4c  first child
//! 0x74  start block
//! 0x78  size in bytes
//! ```

use bytes::{Buf, BufMut};

use crate::error::{OleError, Result};
use crate::format::{DIR_ENTRY_SIZE, END_OF_CHAIN, NO_ENTRY, ROOT_INDEX};

const OFFSET_NAME_LEN: usize = 0x40;
const OFFSET_PREV: usize = 0x44;
const OFFSET_START: usize = 0x74;

/// Longest name in UTF-16 code units, not counting the NUL
pub const MAX_NAME_UNITS: usize = 31;

const COLOUR_BLACK: u8 = 1;
const ROOT_NAME: &str = "Root Entry";

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Storage,
    Stream,
    Root,
}

impl EntryKind {
    pub fn to_raw(self) -> u8 {
        match self {
            EntryKind::Storage => 1,
            EntryKind::Stream => 2,
            EntryKind::Root => 5,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(EntryKind::Storage),
            2 => Some(EntryKind::Stream),
            5 => Some(EntryKind::Root),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Storage => write!(f, "storage"),
            EntryKind::Stream => write!(f, "stream"),
            EntryKind::Root => write!(f, "root"),
        }
    }
}

/// One decoded directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Slot index in the directory chain
    pub index: u32,
    pub name: String,
    pub kind: EntryKind,
    pub prev: u32,
    pub next: u32,
    pub child: u32,
    /// First block of the data chain (END_OF_CHAIN when empty)
    pub start: u32,
    pub size: u32,
}

impl DirEntry {
    pub const SIZE: usize = DIR_ENTRY_SIZE;

    /// Fresh, unlinked, empty entry
    pub fn new(index: u32, name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            prev: NO_ENTRY,
            next: NO_ENTRY,
            child: NO_ENTRY,
            start: END_OF_CHAIN,
            size: 0,
        }
    }

    pub fn root() -> Self {
        Self::new(ROOT_INDEX, ROOT_NAME, EntryKind::Root)
    }

    /// Storages and the root can hold children
    pub fn is_storage(&self) -> bool {
        matches!(self.kind, EntryKind::Storage | EntryKind::Root)
    }

    pub fn is_stream(&self) -> bool {
        self.kind == EntryKind::Stream
    }

    /// True if the raw record is an unallocated slot
    pub fn is_free(raw: &[u8]) -> bool {
        raw.len() > OFFSET_NAME_LEN + 1 && raw[OFFSET_NAME_LEN] == 0 && raw[OFFSET_NAME_LEN + 1] == 0
    }

    /// Decode a raw record; `None` for a free slot
    pub fn decode(index: u32, raw: &[u8]) -> Result<Option<Self>> {
        if raw.len() < DIR_ENTRY_SIZE {
            return Err(OleError::Format(format!(
                "directory entry {} is truncated",
                index
            )));
        }
        if Self::is_free(raw) {
            return Ok(None);
        }

        let mut buf = &raw[OFFSET_NAME_LEN..];
        let name_bytes = buf.get_u16_le() as usize;
        let raw_kind = buf.get_u8();
        let _colour = buf.get_u8();
        let prev = buf.get_u32_le();
        let next = buf.get_u32_le();
        let child = buf.get_u32_le();

        let kind = EntryKind::from_raw(raw_kind).ok_or_else(|| {
            OleError::Format(format!(
                "directory entry {} has unknown type {}",
                index, raw_kind
            ))
        })?;

        let units = (name_bytes / 2).saturating_sub(1).min(MAX_NAME_UNITS);
        let mut name_buf = &raw[..units * 2];
        let mut utf16 = Vec::with_capacity(units);
        while name_buf.has_remaining() {
            let unit = name_buf.get_u16_le();
            if unit == 0 {
                break;
            }
            utf16.push(unit);
        }

        let mut tail = &raw[OFFSET_START..];
        let start = tail.get_u32_le();
        let size = tail.get_u32_le();

        Ok(Some(Self {
            index,
            name: String::from_utf16_lossy(&utf16),
            kind,
            prev,
            next,
            child,
            start,
            size,
        }))
    }

    /// Encode into a full 128-byte record
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let units: Vec<u16> = self.name.encode_utf16().take(MAX_NAME_UNITS).collect();

        let mut out = Vec::with_capacity(DIR_ENTRY_SIZE);
        for &unit in &units {
            out.put_u16_le(unit);
        }
        out.put_bytes(0, OFFSET_NAME_LEN - out.len());
        out.put_u16_le(((units.len() + 1) * 2) as u16);
        out.put_u8(self.kind.to_raw());
        out.put_u8(COLOUR_BLACK);
        debug_assert_eq!(out.len(), OFFSET_PREV);
        out.put_u32_le(self.prev);
        out.put_u32_le(self.next);
        out.put_u32_le(self.child);
        out.put_bytes(0, OFFSET_START - out.len()); // class id, state bits, times
        out.put_u32_le(self.start);
        out.put_u32_le(self.size);
        out.put_bytes(0, DIR_ENTRY_SIZE - out.len());

        let mut record = [0u8; DIR_ENTRY_SIZE];
        record.copy_from_slice(&out);
        record
    }
}

/// Check a storage/stream name: 1 to 31 UTF-16 units, none of `/ \ : !`
pub fn validate_name(name: &str) -> Result<()> {
    let units = name.encode_utf16().count();
    if units == 0 || units > MAX_NAME_UNITS {
        return Err(OleError::InvalidArgument(format!(
            "name must be 1..={} UTF-16 units, got {} ({:?})",
            MAX_NAME_UNITS, units, name
        )));
    }
    if let Some(bad) = name.chars().find(|c| matches!(c, '/' | '\\' | ':' | '!')) {
        return Err(OleError::InvalidArgument(format!(
            "name {:?} contains reserved character {:?}",
            name, bad
        )));
    }
    Ok(())
}

/// Case-insensitive name comparison used for lookups and duplicate checks
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}
