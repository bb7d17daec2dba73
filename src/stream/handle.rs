//! Stream handle
//!
//! Cursor state for one open stream plus the read/write/seek paths. The
//! handle keeps block indices only; bytes are always reached through the
//! file image at the point of use.

use std::io::SeekFrom;

use crate::alloc::{AllocationTable, SmallBlockTable};
use crate::directory::{DirEntry, Directory};
use crate::error::{OleError, Result};
use crate::format::address::big_block_offset;
use crate::format::{
    blocks_for, BlockPointer, FileImage, BIG_BLOCK_SIZE, BIG_BLOCK_THRESHOLD, END_OF_CHAIN,
    SMALL_BLOCK_SIZE,
};

use super::{Backing, StreamMode};

/// Mutable view of the container parts a stream write touches
pub(crate) struct BlockStore<'a> {
    pub image: &'a mut FileImage,
    pub bat: &'a mut AllocationTable,
    pub small: &'a mut SmallBlockTable,
    pub dir: &'a Directory,
}

/// One open stream
#[derive(Debug, Clone)]
pub struct StreamHandle {
    entry: u32,
    mode: StreamMode,
    backing: Backing,
    position: u32,
    size: u32,
    blocks: Vec<u32>,
}

impl StreamHandle {
    /// Materialize the chain of `entry`. A chain shorter than the declared
    /// size is corrupt; a longer one is tolerated for reading and trimmed
    /// for writing.
    pub(crate) fn open(store: &mut BlockStore<'_>, entry: &DirEntry, mode: StreamMode) -> Result<Self> {
        let backing = Backing::for_size(entry.size);

        let stale_start = entry.size == 0 && entry.start != END_OF_CHAIN;
        let blocks = if stale_start {
            tracing::warn!(
                entry = entry.index,
                start = entry.start,
                "Empty stream has a start block, ignoring it"
            );
            if mode == StreamMode::Write {
                release_stale_chain(store, entry)?;
            }
            Vec::new()
        } else {
            match backing {
                Backing::Big => store.bat.chain(store.image, entry.start)?,
                Backing::Small => store.small.chain(store.image, entry.start)?,
            }
        };

        let needed = blocks_for(entry.size, backing.block_size());
        if blocks.len() < needed {
            return Err(OleError::corrupt(
                entry.start,
                format!(
                    "stream {:?} holds {} bytes but its chain has only {} blocks",
                    entry.name,
                    entry.size,
                    blocks.len()
                ),
            ));
        }

        let mut handle = Self {
            entry: entry.index,
            mode,
            backing,
            position: 0,
            size: entry.size,
            blocks,
        };

        if handle.blocks.len() > needed {
            tracing::warn!(
                name = %entry.name,
                blocks = handle.blocks.len(),
                needed,
                "Stream chain is longer than its size"
            );
            if mode == StreamMode::Write {
                handle.trim_blocks(store, needed)?;
                handle.sync_entry(store)?;
            }
        } else if mode == StreamMode::Write && stale_start {
            handle.sync_entry(store)?;
        }
        Ok(handle)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Directory index of the stream
    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Materialized block list, in chain order
    pub fn blocks(&self) -> &[u32] {
        &self.blocks
    }

    /// Bytes between the cursor and the end of the stream
    pub fn remaining(&self) -> u32 {
        self.size - self.position
    }

    fn block_offset(&self, small: &SmallBlockTable, index: usize) -> Result<usize> {
        let block = *self.blocks.get(index).ok_or_else(|| {
            OleError::corrupt(END_OF_CHAIN, format!("stream has no block #{}", index))
        })?;
        match self.backing {
            Backing::Big => Ok(big_block_offset(block)),
            Backing::Small => small.block_offset(block),
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Fill `buf` from the cursor. Fails without moving the cursor if the
    /// stream does not hold that many bytes.
    pub(crate) fn read(&mut self, image: &FileImage, small: &SmallBlockTable, buf: &mut [u8]) -> Result<()> {
        let available = self.remaining() as usize;
        if buf.len() > available {
            return Err(OleError::ShortRead {
                requested: buf.len(),
                available,
            });
        }

        let block_size = self.backing.block_size();
        let mut done = 0;
        while done < buf.len() {
            let pos = self.position as usize + done;
            let within = pos % block_size;
            let len = (block_size - within).min(buf.len() - done);
            let offset = self.block_offset(small, pos / block_size)? + within;
            buf[done..done + len].copy_from_slice(image.slice(offset, len)?);
            done += len;
        }

        self.position += buf.len() as u32;
        Ok(())
    }

    /// Borrow `len` bytes straight out of the image when they are stored
    /// contiguously. `None` means the caller has to copy with `read`.
    pub(crate) fn read_in_place<'a>(
        &mut self,
        image: &'a FileImage,
        small: &SmallBlockTable,
        len: usize,
    ) -> Result<Option<&'a [u8]>> {
        let available = self.remaining() as usize;
        if len > available {
            return Err(OleError::ShortRead {
                requested: len,
                available,
            });
        }
        if len == 0 {
            let empty: &[u8] = &[];
            return Ok(Some(empty));
        }

        let block_size = self.backing.block_size();
        let pos = self.position as usize;
        let first = pos / block_size;
        let last = (pos + len - 1) / block_size;
        let start = self.block_offset(small, first)? + pos % block_size;

        let mut expected = self.block_offset(small, first)?;
        for index in first + 1..=last {
            expected += block_size;
            if self.block_offset(small, index)? != expected {
                return Ok(None);
            }
        }

        let bytes = image.slice(start, len)?;
        self.position += len as u32;
        Ok(Some(bytes))
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Write `data` at the cursor, growing the chain as needed
    pub(crate) fn write(&mut self, store: &mut BlockStore<'_>, data: &[u8]) -> Result<()> {
        if self.mode != StreamMode::Write {
            return Err(OleError::InvalidArgument(
                "stream is open for reading".to_string(),
            ));
        }
        if self.position as u64 + data.len() as u64 > u32::MAX as u64 {
            return Err(OleError::CapacityExceeded(
                "stream size would exceed 4 GiB".to_string(),
            ));
        }

        let start_size = self.size;
        let start_position = self.position;
        if let Err(e) = self.write_chunks(store, data) {
            // A small stream is left as it was; a big one keeps what fit
            if self.backing == Backing::Small {
                self.trim_blocks(store, blocks_for(start_size, SMALL_BLOCK_SIZE))?;
                self.size = start_size;
                self.position = start_position;
            }
            self.sync_entry(store)?;
            return Err(e);
        }
        self.sync_entry(store)
    }

    fn write_chunks(&mut self, store: &mut BlockStore<'_>, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let block_size = self.backing.block_size();
            let pos = self.position as usize;
            let index = pos / block_size;
            if index == self.blocks.len() {
                self.append_block(store)?;
            }

            let within = pos % block_size;
            let len = (block_size - within).min(data.len() - done);
            let offset = self.block_offset(store.small, index)? + within;
            store
                .image
                .slice_mut(offset, len)?
                .copy_from_slice(&data[done..done + len]);

            done += len;
            self.position += len as u32;
            self.size = self.size.max(self.position);

            if self.backing == Backing::Small && self.size >= BIG_BLOCK_THRESHOLD {
                self.promote(store)?;
            }
        }
        Ok(())
    }

    fn append_block(&mut self, store: &mut BlockStore<'_>) -> Result<()> {
        let last = self.blocks.last().copied();
        let block = match self.backing {
            Backing::Big => store.bat.extend_chain(store.image, last)?,
            Backing::Small => {
                let (block, payload_grew) = store.small.allocate(store.image, store.bat)?;
                if let Some(last) = last {
                    store
                        .small
                        .set_next(store.image, last, BlockPointer::Next(block))?;
                }
                if payload_grew {
                    store.dir.set_root_payload(
                        store.image,
                        store.small.payload_start(),
                        store.small.payload_size(),
                    )?;
                }
                block
            }
        };

        self.blocks.push(block);
        if last.is_none() {
            self.sync_entry(store)?;
        }
        Ok(())
    }

    /// Move the stream from small to big blocks, keeping the cursor. The
    /// big chain is reserved up front; if that fails nothing has changed.
    fn promote(&mut self, store: &mut BlockStore<'_>) -> Result<()> {
        let big = reserve_big_chain(store, blocks_for(self.size, BIG_BLOCK_SIZE))?;

        let saved_position = self.position;
        let mut snapshot = vec![0u8; self.size as usize];
        self.position = 0;
        let copied = self.read(store.image, store.small, &mut snapshot);
        self.position = saved_position;
        if let Err(e) = copied {
            if let Some(&start) = big.first() {
                store.bat.free_chain(store.image, start)?;
            }
            return Err(e);
        }

        for (chunk, &block) in snapshot.chunks(BIG_BLOCK_SIZE).zip(&big) {
            store
                .image
                .slice_mut(big_block_offset(block), chunk.len())?
                .copy_from_slice(chunk);
        }

        let small_blocks = std::mem::replace(&mut self.blocks, big);
        self.backing = Backing::Big;
        self.sync_entry(store)?;

        if let Some(&start) = small_blocks.first() {
            store.small.free_chain(store.image, store.bat, start)?;
        }

        tracing::debug!(
            entry = self.entry,
            size = self.size,
            blocks = self.blocks.len(),
            "Stream promoted to big blocks"
        );
        Ok(())
    }

    /// Cut the chain down to `needed` blocks, freeing the rest
    fn trim_blocks(&mut self, store: &mut BlockStore<'_>, needed: usize) -> Result<()> {
        let Some(&excess) = self.blocks.get(needed) else {
            return Ok(());
        };
        let last = needed.checked_sub(1).and_then(|i| self.blocks.get(i)).copied();
        match self.backing {
            Backing::Big => {
                if let Some(last) = last {
                    store.bat.set_next(store.image, last, BlockPointer::EndOfChain)?;
                }
                store.bat.free_chain(store.image, excess)?;
            }
            Backing::Small => {
                if let Some(last) = last {
                    store
                        .small
                        .set_next(store.image, last, BlockPointer::EndOfChain)?;
                }
                store.small.free_chain(store.image, store.bat, excess)?;
            }
        }
        self.blocks.truncate(needed);
        Ok(())
    }

    /// Write the current start block and size into the directory entry
    pub(crate) fn sync_entry(&self, store: &mut BlockStore<'_>) -> Result<()> {
        let mut entry = store.dir.entry(store.image, self.entry)?;
        let start = self.blocks.first().copied().unwrap_or(END_OF_CHAIN);
        if entry.start == start && entry.size == self.size {
            return Ok(());
        }
        entry.start = start;
        entry.size = self.size;
        store.dir.write_entry(store.image, &entry)
    }

    // =========================================================================
    // Positioning
    // =========================================================================

    /// Move the cursor, clamping to `[0, size]`
    pub(crate) fn seek(&mut self, pos: SeekFrom) -> u64 {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
        };

        if target > self.size as i128 && self.mode == StreamMode::Write {
            tracing::warn!(
                entry = self.entry,
                target = %target,
                size = self.size,
                "Seek past end of stream clamped"
            );
        }

        self.position = target.clamp(0, self.size as i128) as u32;
        self.position as u64
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Re-walk the on-disk chain and compare it with the block list
    pub(crate) fn verify(&self, image: &FileImage, bat: &AllocationTable, small: &SmallBlockTable) -> Result<()> {
        let start = self.blocks.first().copied().unwrap_or(END_OF_CHAIN);
        let on_disk = match self.backing {
            Backing::Big => bat.chain(image, start)?,
            Backing::Small => small.chain(image, start)?,
        };
        if on_disk != self.blocks {
            return Err(OleError::corrupt(
                start,
                format!(
                    "stream chain on disk ({} blocks) differs from the open handle ({} blocks)",
                    on_disk.len(),
                    self.blocks.len()
                ),
            ));
        }
        let needed = blocks_for(self.size, self.backing.block_size());
        if needed != self.blocks.len() {
            return Err(OleError::corrupt(
                start,
                format!("{} bytes need {} blocks, handle has {}", self.size, needed, self.blocks.len()),
            ));
        }
        Ok(())
    }
}

/// Allocate a fresh big-block chain of `count` blocks, all or nothing
fn reserve_big_chain(store: &mut BlockStore<'_>, count: usize) -> Result<Vec<u32>> {
    let mut blocks: Vec<u32> = Vec::with_capacity(count);
    for _ in 0..count {
        match store.bat.extend_chain(store.image, blocks.last().copied()) {
            Ok(block) => blocks.push(block),
            Err(e) => {
                if let Some(&start) = blocks.first() {
                    store.bat.free_chain(store.image, start)?;
                }
                return Err(e);
            }
        }
    }
    Ok(blocks)
}

/// Free the chain an empty stream still points at. Size 0 is below the
/// threshold, so the chain is followed as small blocks. A corrupt chain
/// is left in place.
pub(crate) fn release_stale_chain(store: &mut BlockStore<'_>, entry: &DirEntry) -> Result<()> {
    match store.small.free_chain(store.image, store.bat, entry.start) {
        Ok(freed) => {
            tracing::warn!(
                entry = entry.index,
                start = entry.start,
                freed,
                "Released the chain of an empty stream"
            );
            Ok(())
        }
        Err(OleError::CorruptChain { block, detail }) => {
            tracing::warn!(
                entry = entry.index,
                block,
                %detail,
                "Chain of an empty stream is corrupt, leaving it"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}
