//! Address translation
//!
//! Pure block-index ↔ byte-offset arithmetic. Nothing here touches file
//! bytes; callers resolve offsets against the image at the point of use.

use super::{BIG_BLOCK_SIZE, DIR_ENTRY_SIZE, ENTRIES_PER_BLOCK, POINTERS_PER_BLOCK, SMALL_BLOCK_SIZE};

/// Byte offset of the first byte of big block `block` (block 0 follows the header)
pub const fn big_block_offset(block: u32) -> usize {
    (block as usize + 1) * BIG_BLOCK_SIZE
}

/// Position of small block `block` inside the small-block file:
/// (index into the SBF chain, byte offset inside that big block)
pub const fn small_block_location(block: u32) -> (usize, usize) {
    let byte = block as usize * SMALL_BLOCK_SIZE;
    (byte / BIG_BLOCK_SIZE, byte % BIG_BLOCK_SIZE)
}

/// Byte offset of small block `block`, given the small-block file chain
pub fn small_block_offset(payload_chain: &[u32], block: u32) -> Option<usize> {
    let (chain_idx, offset) = small_block_location(block);
    payload_chain
        .get(chain_idx)
        .map(|&big| big_block_offset(big) + offset)
}

/// Position of the table slot describing `block`:
/// (index of the descriptor block, byte offset inside it)
pub const fn pointer_location(block: u32) -> (usize, usize) {
    let block = block as usize;
    (block / POINTERS_PER_BLOCK, (block % POINTERS_PER_BLOCK) * 4)
}

/// Position of directory entry `index`:
/// (index into the root chain, byte offset inside that big block)
pub const fn entry_location(index: u32) -> (usize, usize) {
    let index = index as usize;
    (index / ENTRIES_PER_BLOCK, (index % ENTRIES_PER_BLOCK) * DIR_ENTRY_SIZE)
}
