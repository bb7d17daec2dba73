//! Big-block allocation table

use crate::config::Config;
use crate::error::{OleError, Result};
use crate::format::address::{big_block_offset, pointer_location};
use crate::format::{BlockPointer, FileImage, END_OF_CHAIN, POINTERS_PER_BLOCK};

/// In-memory view of the big-block allocation table.
///
/// Holds only the descriptor block indices; slot values always live in
/// the file image.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    /// Descriptor block indices, in header order
    descriptors: Vec<u32>,
    /// Ceiling on descriptor blocks
    max_descriptors: usize,
    /// File growth increment in blocks
    growth_blocks: u32,
    /// Every slot below this index is in use
    free_hint: u32,
}

impl AllocationTable {
    /// Load the descriptor list from the header
    pub fn load(image: &FileImage, config: &Config) -> Result<Self> {
        let count = image.bat_count() as usize;
        let mut descriptors = Vec::with_capacity(count);
        for i in 0..count {
            let block = image.bat_descriptor(i);
            if !image.covers(block) {
                return Err(OleError::Format(format!(
                    "allocation table block {} lies outside the file",
                    block
                )));
            }
            descriptors.push(block);
        }

        Ok(Self {
            max_descriptors: config.max_bat_blocks.max(count),
            growth_blocks: config.growth_blocks,
            descriptors,
            free_hint: 0,
        })
    }

    /// Number of blocks the table can describe
    pub fn capacity(&self) -> u32 {
        (self.descriptors.len() * POINTERS_PER_BLOCK) as u32
    }

    pub fn descriptors(&self) -> &[u32] {
        &self.descriptors
    }

    fn slot_offset(&self, block: u32) -> Result<usize> {
        let (index, offset) = pointer_location(block);
        self.descriptors
            .get(index)
            .map(|&desc| big_block_offset(desc) + offset)
            .ok_or_else(|| OleError::corrupt(block, "outside the allocation table"))
    }

    // =========================================================================
    // Slots
    // =========================================================================

    pub fn next(&self, image: &FileImage, block: u32) -> Result<BlockPointer> {
        let raw = image.read_u32(self.slot_offset(block)?)?;
        Ok(BlockPointer::from(raw))
    }

    pub fn set_next(&mut self, image: &mut FileImage, block: u32, next: BlockPointer) -> Result<()> {
        image.write_u32(self.slot_offset(block)?, next.to_raw())?;
        if next.is_unused() && block < self.free_hint {
            self.free_hint = block;
        }
        Ok(())
    }

    /// Follow a chain from `start` to END_OF_CHAIN
    pub fn chain(&self, image: &FileImage, start: u32) -> Result<Vec<u32>> {
        let mut blocks = Vec::new();
        if start == END_OF_CHAIN {
            return Ok(blocks);
        }

        let limit = self.capacity() as usize;
        let mut current = BlockPointer::from(start);
        loop {
            let block = match current {
                BlockPointer::Next(block) => block,
                other => {
                    let at = blocks.last().copied().unwrap_or(start);
                    return Err(OleError::corrupt(at, format!("{} inside a chain", other)));
                }
            };
            if !image.covers(block) {
                return Err(OleError::corrupt(block, "link past the end of the file"));
            }
            blocks.push(block);
            if blocks.len() > limit {
                return Err(OleError::corrupt(block, "chain loops"));
            }

            current = self.next(image, block)?;
            if current == BlockPointer::EndOfChain {
                return Ok(blocks);
            }
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Claim the lowest free block, growing the table if it is full
    pub fn allocate(&mut self, image: &mut FileImage) -> Result<u32> {
        loop {
            let capacity = self.capacity();
            for block in self.free_hint..capacity {
                if self.next(image, block)?.is_unused() {
                    self.set_next(image, block, BlockPointer::EndOfChain)?;
                    self.free_hint = block + 1;
                    image.ensure_covers(block, self.growth_blocks, capacity);
                    tracing::trace!(block, "Allocated big block");
                    return Ok(block);
                }
            }
            self.free_hint = capacity;
            self.grow(image)?;
        }
    }

    /// Allocate a block and link it after `last` (if any)
    pub fn extend_chain(&mut self, image: &mut FileImage, last: Option<u32>) -> Result<u32> {
        let block = self.allocate(image)?;
        if let Some(last) = last {
            self.set_next(image, last, BlockPointer::Next(block))?;
        }
        Ok(block)
    }

    /// Release every block of a chain. The chain is validated first, so a
    /// corrupt chain is left untouched. Returns the number of blocks freed.
    pub fn free_chain(&mut self, image: &mut FileImage, start: u32) -> Result<usize> {
        let blocks = self.chain(image, start)?;
        for &block in &blocks {
            self.set_next(image, block, BlockPointer::Unused)?;
        }
        Ok(blocks.len())
    }

    /// Blocks currently marked in use (table blocks included)
    pub fn used_blocks(&self, image: &FileImage) -> Result<u32> {
        let mut used = 0;
        for block in 0..self.capacity() {
            if !self.next(image, block)?.is_unused() {
                used += 1;
            }
        }
        Ok(used)
    }

    /// Append one descriptor block. It sits at the first index the grown
    /// table can describe, and its own slot is marked SPECIAL.
    fn grow(&mut self, image: &mut FileImage) -> Result<()> {
        if self.descriptors.len() >= self.max_descriptors {
            return Err(OleError::CapacityExceeded(format!(
                "allocation table is limited to {} descriptor blocks",
                self.max_descriptors
            )));
        }

        let block = self.capacity();
        let new_capacity = block + POINTERS_PER_BLOCK as u32;
        image.ensure_covers(block, self.growth_blocks, new_capacity);
        image.clear_table_block(block)?;

        let index = self.descriptors.len();
        self.descriptors.push(block);
        self.set_next(image, block, BlockPointer::Special)?;
        image.set_bat_descriptor(index, block);
        image.set_bat_count(self.descriptors.len() as u32);

        tracing::debug!(
            block,
            descriptors = self.descriptors.len(),
            "Allocation table grown"
        );
        Ok(())
    }
}
