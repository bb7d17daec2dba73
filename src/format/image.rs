//! File image
//!
//! The whole container file held in memory. Every other component reaches
//! the bytes through an offset into this image, so growing it (which may
//! move the backing buffer) never leaves anything dangling.

use bytes::{Buf, BufMut};

use crate::directory::DirEntry;
use crate::error::{OleError, Result};

use super::address::{big_block_offset, pointer_location};
use super::header::{
    OFFSET_BAT_COUNT, OFFSET_BAT_LIST, OFFSET_ROOT_START, OFFSET_SBAT_COUNT, OFFSET_SBAT_START,
};
use super::{Header, BIG_BLOCK_SIZE, END_OF_CHAIN, SPECIAL_BLOCK};

/// Owned, growable byte image of a container file
#[derive(Debug, Clone)]
pub struct FileImage {
    bytes: Vec<u8>,
    dirty: bool,
}

impl FileImage {
    /// Wrap raw file contents, zero-padding a ragged tail up to a whole block
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        let len = bytes.len().max(BIG_BLOCK_SIZE);
        let padded = (len + BIG_BLOCK_SIZE - 1) / BIG_BLOCK_SIZE * BIG_BLOCK_SIZE;
        bytes.resize(padded, 0);
        Self {
            bytes,
            dirty: false,
        }
    }

    /// Minimal valid layout: header, one allocation-table block (block 0)
    /// and one directory block holding the root entry (block 1)
    pub fn bootstrap() -> Self {
        let mut bytes = Header::bootstrap().encode();
        bytes.resize(BIG_BLOCK_SIZE * 3, 0);

        let mut image = Self { bytes, dirty: true };

        let bat = big_block_offset(0);
        image.bytes[bat..bat + BIG_BLOCK_SIZE].fill(0xff);
        image.put_u32(bat + pointer_location(0).1, SPECIAL_BLOCK);
        image.put_u32(bat + pointer_location(1).1, END_OF_CHAIN);

        let root = big_block_offset(1);
        image.bytes[root..root + DirEntry::SIZE].copy_from_slice(&DirEntry::root().encode());

        image
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Number of big blocks the file currently covers
    pub fn block_count(&self) -> u32 {
        (self.bytes.len() / BIG_BLOCK_SIZE).saturating_sub(1) as u32
    }

    /// True if big block `block` lies inside the file
    pub fn covers(&self, block: u32) -> bool {
        block < self.block_count()
    }

    pub fn block(&self, block: u32) -> Result<&[u8]> {
        self.slice(big_block_offset(block), BIG_BLOCK_SIZE)
    }

    pub fn block_mut(&mut self, block: u32) -> Result<&mut [u8]> {
        self.slice_mut(big_block_offset(block), BIG_BLOCK_SIZE)
    }

    /// Make sure `block` exists, growing by at least `increment` blocks but
    /// never past `ceiling` blocks unless `block` itself lies beyond it.
    /// Returns true if the file grew.
    pub fn ensure_covers(&mut self, block: u32, increment: u32, ceiling: u32) -> bool {
        if self.covers(block) {
            return false;
        }
        let needed = block + 1;
        let target = self
            .block_count()
            .saturating_add(increment.max(1))
            .min(ceiling)
            .max(needed);
        self.bytes
            .resize((target as usize + 1) * BIG_BLOCK_SIZE, 0);
        self.dirty = true;
        tracing::trace!(blocks = target, "File image grown");
        true
    }

    // =========================================================================
    // Raw Access
    // =========================================================================

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.bytes
            .get(offset..offset + len)
            .ok_or_else(|| out_of_range(offset, len))
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.dirty = true;
        self.bytes
            .get_mut(offset..offset + len)
            .ok_or_else(|| out_of_range(offset, len))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut raw = self.slice(offset, 4)?;
        Ok(raw.get_u32_le())
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let mut raw = self.slice_mut(offset, 4)?;
        raw.put_u32_le(value);
        Ok(())
    }

    // =========================================================================
    // Header Fields
    // =========================================================================
    // The image is never shorter than one block, so header offsets are
    // always in range.

    fn get_u32(&self, offset: usize) -> u32 {
        let mut raw = &self.bytes[offset..offset + 4];
        raw.get_u32_le()
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        let mut raw = &mut self.bytes[offset..offset + 4];
        raw.put_u32_le(value);
        self.dirty = true;
    }

    pub fn header(&self) -> Result<Header> {
        Header::parse(&self.bytes)
    }

    pub fn bat_count(&self) -> u32 {
        self.get_u32(OFFSET_BAT_COUNT)
    }

    pub fn set_bat_count(&mut self, count: u32) {
        self.put_u32(OFFSET_BAT_COUNT, count);
    }

    /// Block index of allocation-table descriptor `i`
    pub fn bat_descriptor(&self, i: usize) -> u32 {
        self.get_u32(OFFSET_BAT_LIST + i * 4)
    }

    pub fn set_bat_descriptor(&mut self, i: usize, block: u32) {
        self.put_u32(OFFSET_BAT_LIST + i * 4, block);
    }

    pub fn root_start(&self) -> u32 {
        self.get_u32(OFFSET_ROOT_START)
    }

    pub fn sbat_start(&self) -> u32 {
        self.get_u32(OFFSET_SBAT_START)
    }

    pub fn set_sbat_start(&mut self, block: u32) {
        self.put_u32(OFFSET_SBAT_START, block);
    }

    pub fn sbat_count(&self) -> u32 {
        self.get_u32(OFFSET_SBAT_COUNT)
    }

    pub fn set_sbat_count(&mut self, count: u32) {
        self.put_u32(OFFSET_SBAT_COUNT, count);
    }

    /// Mark every slot of a table block free (UNUSED is all ones)
    pub(crate) fn clear_table_block(&mut self, block: u32) -> Result<()> {
        self.block_mut(block)?.fill(0xff);
        Ok(())
    }
}

fn out_of_range(offset: usize, len: usize) -> OleError {
    OleError::Format(format!(
        "access of {} bytes at offset {:#x} is beyond the end of the file",
        len, offset
    ))
}
