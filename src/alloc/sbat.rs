//! Small-block allocation
//!
//! Small blocks are carved out of the small-block file (SBF), an ordinary
//! big-block chain that starts at the root entry. Their "next" pointers live
//! in the small-block table (SBAT), another big-block chain whose start and
//! length are mirrored in the header.

use crate::error::{OleError, Result};
use crate::format::address::{big_block_offset, pointer_location, small_block_offset};
use crate::format::{
    BlockPointer, FileImage, BIG_BLOCK_SIZE, END_OF_CHAIN, POINTERS_PER_BLOCK,
    SMALL_BLOCKS_PER_BIG,
};

use super::AllocationTable;

/// In-memory view of the SBAT and SBF chains
#[derive(Debug, Clone, Default)]
pub struct SmallBlockTable {
    /// SBAT chain (big blocks holding small-block slots)
    descriptors: Vec<u32>,
    /// SBF chain (big blocks holding small-block payload)
    payload: Vec<u32>,
    /// Every slot below this index is in use
    free_hint: u32,
}

impl SmallBlockTable {
    /// Load both chains. `payload_start` is the root entry's start block.
    pub fn load(image: &FileImage, bat: &AllocationTable, payload_start: u32) -> Result<Self> {
        let descriptors = bat.chain(image, image.sbat_start())?;
        if descriptors.len() != image.sbat_count() as usize {
            tracing::warn!(
                header = image.sbat_count(),
                chain = descriptors.len(),
                "Small-block table length disagrees with the header"
            );
        }
        let payload = bat.chain(image, payload_start)?;

        let table = Self {
            descriptors,
            payload,
            free_hint: 0,
        };

        let payload_slots = (table.payload.len() * SMALL_BLOCKS_PER_BIG) as u32;
        for block in payload_slots..table.slot_count() {
            if !table.next(image, block)?.is_unused() {
                return Err(OleError::Format(format!(
                    "small block {} is in use but the small-block file holds only {}",
                    block, payload_slots
                )));
            }
        }

        Ok(table)
    }

    /// Small blocks that have both a slot and payload space
    pub fn capacity(&self) -> u32 {
        self.slot_count().min((self.payload.len() * SMALL_BLOCKS_PER_BIG) as u32)
    }

    /// Slots covered by the table blocks, free or not
    pub fn slot_count(&self) -> u32 {
        (self.descriptors.len() * POINTERS_PER_BLOCK) as u32
    }

    pub fn descriptors(&self) -> &[u32] {
        &self.descriptors
    }

    pub fn payload(&self) -> &[u32] {
        &self.payload
    }

    /// First block of the small-block file, for the root entry
    pub fn payload_start(&self) -> u32 {
        self.payload.first().copied().unwrap_or(END_OF_CHAIN)
    }

    /// Byte size of the small-block file, for the root entry
    pub fn payload_size(&self) -> u32 {
        (self.payload.len() * BIG_BLOCK_SIZE) as u32
    }

    /// Byte offset of small block `block` in the image
    pub fn block_offset(&self, block: u32) -> Result<usize> {
        small_block_offset(&self.payload, block)
            .ok_or_else(|| OleError::corrupt(block, "past the end of the small-block file"))
    }

    fn slot_offset(&self, block: u32) -> Result<usize> {
        let (index, offset) = pointer_location(block);
        self.descriptors
            .get(index)
            .map(|&desc| big_block_offset(desc) + offset)
            .ok_or_else(|| OleError::corrupt(block, "outside the small-block table"))
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

    /// Follow a small-block chain from `start` to END_OF_CHAIN
    pub fn chain(&self, image: &FileImage, start: u32) -> Result<Vec<u32>> {
        let mut blocks = Vec::new();
        if start == END_OF_CHAIN {
            return Ok(blocks);
        }

        let payload_slots = (self.payload.len() * SMALL_BLOCKS_PER_BIG) as u32;
        let limit = self.slot_count() as usize;
        let mut current = BlockPointer::from(start);
        loop {
            let block = match current {
                BlockPointer::Next(block) => block,
                other => {
                    let at = blocks.last().copied().unwrap_or(start);
                    return Err(OleError::corrupt(
                        at,
                        format!("{} inside a small-block chain", other),
                    ));
                }
            };
            if block >= payload_slots {
                return Err(OleError::corrupt(block, "past the end of the small-block file"));
            }
            blocks.push(block);
            if blocks.len() > limit {
                return Err(OleError::corrupt(block, "small-block chain loops"));
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

    /// Claim the lowest free small block. The second value reports whether
    /// the small-block file grew, in which case the root entry must be
    /// refreshed from `payload_start`/`payload_size`.
    pub fn allocate(&mut self, image: &mut FileImage, bat: &mut AllocationTable) -> Result<(u32, bool)> {
        let mut payload_grew = false;
        loop {
            let capacity = self.capacity();
            for block in self.free_hint..capacity {
                if self.next(image, block)?.is_unused() {
                    self.set_next(image, block, BlockPointer::EndOfChain)?;
                    self.free_hint = block + 1;
                    tracing::trace!(block, "Allocated small block");
                    return Ok((block, payload_grew));
                }
            }
            self.free_hint = capacity;

            if self.slot_count() <= capacity {
                self.grow_table(image, bat)?;
            } else {
                self.grow_payload(image, bat)?;
                payload_grew = true;
            }
        }
    }

    fn grow_table(&mut self, image: &mut FileImage, bat: &mut AllocationTable) -> Result<()> {
        let block = bat.extend_chain(image, self.descriptors.last().copied())?;
        image.clear_table_block(block)?;
        if self.descriptors.is_empty() {
            image.set_sbat_start(block);
        }
        self.descriptors.push(block);
        image.set_sbat_count(self.descriptors.len() as u32);
        tracing::debug!(block, blocks = self.descriptors.len(), "Small-block table grown");
        Ok(())
    }

    fn grow_payload(&mut self, image: &mut FileImage, bat: &mut AllocationTable) -> Result<()> {
        let block = bat.extend_chain(image, self.payload.last().copied())?;
        image.block_mut(block)?.fill(0);
        self.payload.push(block);
        tracing::debug!(block, blocks = self.payload.len(), "Small-block file grown");
        Ok(())
    }

    /// Release every block of a small-block chain, then give trailing empty
    /// table blocks back to the big-block allocator. Validates first.
    pub fn free_chain(
        &mut self,
        image: &mut FileImage,
        bat: &mut AllocationTable,
        start: u32,
    ) -> Result<usize> {
        let blocks = self.chain(image, start)?;
        for &block in &blocks {
            self.set_next(image, block, BlockPointer::Unused)?;
        }
        self.shrink(image, bat)?;
        Ok(blocks.len())
    }

    /// Drop trailing SBAT blocks whose slots are all free. The small-block
    /// file itself is never shortened.
    pub fn shrink(&mut self, image: &mut FileImage, bat: &mut AllocationTable) -> Result<usize> {
        let mut released = 0;
        while let Some(&last) = self.descriptors.last() {
            if image.block(last)?.iter().any(|&b| b != 0xff) {
                break;
            }
            self.descriptors.pop();
            match self.descriptors.last() {
                Some(&tail) => bat.set_next(image, tail, BlockPointer::EndOfChain)?,
                None => image.set_sbat_start(END_OF_CHAIN),
            }
            bat.set_next(image, last, BlockPointer::Unused)?;
            released += 1;
        }

        if released > 0 {
            image.set_sbat_count(self.descriptors.len() as u32);
            self.free_hint = self.free_hint.min(self.capacity());
            tracing::debug!(released, "Small-block table shrunk");
        }
        Ok(released)
    }

    /// Small blocks currently marked in use
    pub fn used_blocks(&self, image: &FileImage) -> Result<u32> {
        let mut used = 0;
        for block in 0..self.slot_count() {
            if !self.next(image, block)?.is_unused() {
                used += 1;
            }
        }
        Ok(used)
    }
}
