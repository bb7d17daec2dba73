//! Directory tree
//!
//! Entries live in the directory chain, four to a block, addressed by slot
//! index. Each storage points at one child; the remaining children hang off
//! that child through prev/next sibling links. New entries are appended at
//! the tail of the next-sibling list.

use std::collections::HashSet;

use crate::alloc::AllocationTable;
use crate::error::{OleError, Result};
use crate::format::address::{big_block_offset, entry_location};
use crate::format::{FileImage, ENTRIES_PER_BLOCK, NO_ENTRY, ROOT_INDEX};

use super::entry::{names_match, validate_name, DirEntry, EntryKind};

/// In-memory view of the directory chain
#[derive(Debug, Clone)]
pub struct Directory {
    chain: Vec<u32>,
}

impl Directory {
    /// Load the directory chain from the header's root start
    pub fn load(image: &FileImage, bat: &AllocationTable) -> Result<Self> {
        let chain = bat.chain(image, image.root_start())?;
        if chain.is_empty() {
            return Err(OleError::Format("directory chain is empty".to_string()));
        }

        let dir = Self { chain };
        match dir.try_entry(image, ROOT_INDEX)? {
            Some(root) if root.kind == EntryKind::Root => Ok(dir),
            Some(other) => Err(OleError::Format(format!(
                "first directory entry is a {}, not the root",
                other.kind
            ))),
            None => Err(OleError::Format("root directory entry is missing".to_string())),
        }
    }

    pub fn chain(&self) -> &[u32] {
        &self.chain
    }

    /// Number of entry slots the chain provides
    pub fn slots(&self) -> u32 {
        (self.chain.len() * ENTRIES_PER_BLOCK) as u32
    }

    fn entry_offset(&self, index: u32) -> Result<usize> {
        let (block, offset) = entry_location(index);
        self.chain
            .get(block)
            .map(|&b| big_block_offset(b) + offset)
            .ok_or_else(|| {
                OleError::InvalidArgument(format!("directory index {} out of range", index))
            })
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Decode entry `index`, `None` if the slot is free
    pub fn try_entry(&self, image: &FileImage, index: u32) -> Result<Option<DirEntry>> {
        let raw = image.slice(self.entry_offset(index)?, DirEntry::SIZE)?;
        DirEntry::decode(index, raw)
    }

    pub fn entry(&self, image: &FileImage, index: u32) -> Result<DirEntry> {
        self.try_entry(image, index)?
            .ok_or_else(|| OleError::NotFound(format!("directory entry {}", index)))
    }

    pub fn write_entry(&self, image: &mut FileImage, entry: &DirEntry) -> Result<()> {
        let offset = self.entry_offset(entry.index)?;
        image
            .slice_mut(offset, DirEntry::SIZE)?
            .copy_from_slice(&entry.encode());
        Ok(())
    }

    /// All allocated entries in slot order
    pub fn live_entries(&self, image: &FileImage) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for index in 0..self.slots() {
            if let Some(entry) = self.try_entry(image, index)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Point the root entry at the small-block file
    pub fn set_root_payload(&self, image: &mut FileImage, start: u32, size: u32) -> Result<()> {
        let mut root = self.entry(image, ROOT_INDEX)?;
        root.start = start;
        root.size = size;
        self.write_entry(image, &root)
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Iterate the children of storage `dir`
    pub fn enter<'a>(&'a self, image: &'a FileImage, dir: u32) -> Result<DirIter<'a>> {
        let entry = self.entry(image, dir)?;
        if !entry.is_storage() {
            return Err(OleError::InvalidArgument(format!(
                "{:?} is a {}, not a storage",
                entry.name, entry.kind
            )));
        }
        Ok(DirIter::new(self, image, entry.child))
    }

    /// Find a child of `parent` by name (case-insensitive)
    pub fn lookup(&self, image: &FileImage, parent: u32, name: &str) -> Result<u32> {
        for index in self.enter(image, parent)? {
            let index = index?;
            if names_match(&self.entry(image, index)?.name, name) {
                return Ok(index);
            }
        }
        Err(OleError::NotFound(name.to_string()))
    }

    /// Storage holding `index`, `None` for the root or an unreachable entry
    pub fn parent_of(&self, image: &FileImage, index: u32) -> Result<Option<u32>> {
        if index == ROOT_INDEX {
            return Ok(None);
        }
        for entry in self.live_entries(image)? {
            if !entry.is_storage() {
                continue;
            }
            for child in DirIter::new(self, image, entry.child) {
                if child? == index {
                    return Ok(Some(entry.index));
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Create a new empty entry under `parent` and return its index
    pub fn create_entry(
        &mut self,
        image: &mut FileImage,
        bat: &mut AllocationTable,
        parent: u32,
        name: &str,
        kind: EntryKind,
    ) -> Result<u32> {
        validate_name(name)?;
        if kind == EntryKind::Root {
            return Err(OleError::InvalidArgument(
                "only one root entry may exist".to_string(),
            ));
        }
        let mut parent_entry = self.entry(image, parent)?;
        if !parent_entry.is_storage() {
            return Err(OleError::InvalidArgument(format!(
                "{:?} is a {}, not a storage",
                parent_entry.name, parent_entry.kind
            )));
        }
        match self.lookup(image, parent, name) {
            Ok(_) => return Err(OleError::AlreadyExists(name.to_string())),
            Err(OleError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let index = match self.free_slot(image)? {
            Some(index) => index,
            None => self.grow(image, bat)?,
        };

        let entry = DirEntry::new(index, name, kind);
        self.write_entry(image, &entry)?;

        if parent_entry.child == NO_ENTRY {
            parent_entry.child = index;
            self.write_entry(image, &parent_entry)?;
        } else {
            let mut tail = self.entry(image, parent_entry.child)?;
            let mut steps = 0;
            while tail.next != NO_ENTRY {
                steps += 1;
                if steps > self.slots() {
                    return Err(OleError::corrupt(tail.index, "directory sibling links loop"));
                }
                tail = self.entry(image, tail.next)?;
            }
            tail.next = index;
            self.write_entry(image, &tail)?;
        }

        tracing::debug!(index, parent, name, %kind, "Directory entry created");
        Ok(index)
    }

    fn free_slot(&self, image: &FileImage) -> Result<Option<u32>> {
        for index in 1..self.slots() {
            if DirEntry::is_free(image.slice(self.entry_offset(index)?, DirEntry::SIZE)?) {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Append a zeroed block to the directory chain; returns its first slot
    fn grow(&mut self, image: &mut FileImage, bat: &mut AllocationTable) -> Result<u32> {
        let first = self.slots();
        let block = bat.extend_chain(image, self.chain.last().copied())?;
        image.block_mut(block)?.fill(0);
        self.chain.push(block);
        tracing::debug!(block, slots = self.slots(), "Directory chain grown");
        Ok(first)
    }

    /// Detach a sole child with no children of its own and zero its record.
    /// Returns the entry as it was before removal.
    pub fn unlink(&mut self, image: &mut FileImage, index: u32) -> Result<DirEntry> {
        if index == ROOT_INDEX {
            return Err(OleError::InvalidArgument(
                "the root entry cannot be removed".to_string(),
            ));
        }
        let entry = self.entry(image, index)?;
        if entry.prev != NO_ENTRY || entry.next != NO_ENTRY {
            return Err(OleError::HasSiblings(index));
        }
        if entry.is_storage() && entry.child != NO_ENTRY {
            return Err(OleError::NotEmpty(entry.name));
        }

        let mut parent = None;
        for candidate in self.live_entries(image)? {
            if candidate.is_storage() && candidate.child == index {
                parent = Some(candidate);
                break;
            }
        }
        // Not anyone's first child, so some sibling still links to it.
        let mut parent = parent.ok_or(OleError::HasSiblings(index))?;

        parent.child = NO_ENTRY;
        self.write_entry(image, &parent)?;
        image
            .slice_mut(self.entry_offset(index)?, DirEntry::SIZE)?
            .fill(0);

        tracing::debug!(index, name = %entry.name, "Directory entry removed");
        Ok(entry)
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Lazy in-order walk over a storage's children (prev subtree, node, next
/// subtree). Stops with an error if the sibling links loop.
pub struct DirIter<'a> {
    dir: &'a Directory,
    image: &'a FileImage,
    anchor: u32,
    pending: Option<u32>,
    stack: Vec<(u32, u32)>,
    seen: HashSet<u32>,
}

impl<'a> DirIter<'a> {
    fn new(dir: &'a Directory, image: &'a FileImage, anchor: u32) -> Self {
        Self {
            dir,
            image,
            anchor,
            pending: Some(anchor),
            stack: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Restart from the first child
    pub fn rewind(&mut self) {
        self.pending = Some(self.anchor);
        self.stack.clear();
        self.seen.clear();
    }

    fn descend(&mut self, mut index: u32) -> Result<()> {
        while index != NO_ENTRY {
            if !self.seen.insert(index) {
                return Err(OleError::corrupt(index, "directory sibling links loop"));
            }
            let entry = self.dir.entry(self.image, index)?;
            self.stack.push((index, entry.next));
            index = entry.prev;
        }
        Ok(())
    }
}

impl Iterator for DirIter<'_> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(index) = self.pending.take() {
            if let Err(e) = self.descend(index) {
                self.stack.clear();
                return Some(Err(e));
            }
        }
        let (index, next) = self.stack.pop()?;
        self.pending = Some(next);
        Some(Ok(index))
    }
}
