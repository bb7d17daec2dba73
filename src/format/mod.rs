//! Format Module
//!
//! On-disk layout of an OLE2 compound container.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (512 bytes, logical block -1)                    │
//! │   Magic (8) | ... | BAT count @0x2c | Root start @0x30  │
//! │   SBAT start @0x3c | SBAT count @0x40 | BAT list @0x4c  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Big block 0 (512 bytes)                                 │
//! ├─────────────────────────────────────────────────────────┤
//! │ Big block 1 ...                                         │
//! │   Each block is one of:                                 │
//! │   - BAT descriptor: 128 x u32 "next" slots              │
//! │   - SBAT descriptor: 128 x u32 small-block slots        │
//! │   - Directory: 4 x 128-byte entries                     │
//! │   - SBF payload: 8 x 64-byte small blocks               │
//! │   - Stream data                                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

pub mod address;
mod header;
mod image;

use std::fmt;

pub use header::Header;
pub use image::FileImage;

// =============================================================================
// Geometry
// =============================================================================

/// Size of the fixed header and of every big block
pub const BIG_BLOCK_SIZE: usize = 512;

/// Size of a small block inside the small-block file
pub const SMALL_BLOCK_SIZE: usize = 64;

/// Small blocks held by one big block of the small-block file
pub const SMALL_BLOCKS_PER_BIG: usize = BIG_BLOCK_SIZE / SMALL_BLOCK_SIZE;

/// 4-byte block pointers held by one table block
pub const POINTERS_PER_BLOCK: usize = BIG_BLOCK_SIZE / 4;

/// Size of one directory entry
pub const DIR_ENTRY_SIZE: usize = 128;

/// Directory entries held by one big block
pub const ENTRIES_PER_BLOCK: usize = BIG_BLOCK_SIZE / DIR_ENTRY_SIZE;

/// Streams this size or larger live in big blocks
pub const BIG_BLOCK_THRESHOLD: u32 = 0x1000;

/// Descriptor blocks the header can list without secondary indirection
pub const MAX_BAT_BLOCKS: usize = 109;

/// Two-part magic signature at offsets 0 and 4
pub const MAGIC: [u32; 2] = [0xe011_cfd0, 0xe11a_b1a1];

// =============================================================================
// Chain Sentinels
// =============================================================================

/// Block holds part of a secondary allocation-table list
pub const EXTENSION_BLOCK: u32 = 0xffff_fffc;

/// Block holds part of the allocation table itself
pub const SPECIAL_BLOCK: u32 = 0xffff_fffd;

/// Last block of a chain
pub const END_OF_CHAIN: u32 = 0xffff_fffe;

/// Free block
pub const UNUSED_BLOCK: u32 = 0xffff_ffff;

/// "No entry" value of directory sibling/child links
pub const NO_ENTRY: u32 = 0xffff_ffff;

/// Directory index of the root entry
pub const ROOT_INDEX: u32 = 0;

// =============================================================================
// Block Pointer
// =============================================================================

/// Value of an allocation-table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPointer {
    /// Chain continues at this block
    Next(u32),
    /// Chain ends here
    EndOfChain,
    /// Slot is free
    Unused,
    /// Block describes part of the allocation table
    Special,
    /// Block describes part of a secondary allocation-table list
    Extension,
}

impl BlockPointer {
    /// Raw on-disk value
    pub fn to_raw(self) -> u32 {
        match self {
            BlockPointer::Next(block) => block,
            BlockPointer::EndOfChain => END_OF_CHAIN,
            BlockPointer::Unused => UNUSED_BLOCK,
            BlockPointer::Special => SPECIAL_BLOCK,
            BlockPointer::Extension => EXTENSION_BLOCK,
        }
    }

    pub fn is_unused(self) -> bool {
        self == BlockPointer::Unused
    }
}

impl From<u32> for BlockPointer {
    fn from(raw: u32) -> Self {
        match raw {
            END_OF_CHAIN => BlockPointer::EndOfChain,
            UNUSED_BLOCK => BlockPointer::Unused,
            SPECIAL_BLOCK => BlockPointer::Special,
            EXTENSION_BLOCK => BlockPointer::Extension,
            block => BlockPointer::Next(block),
        }
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockPointer::Next(block) => write!(f, "-> {}", block),
            BlockPointer::EndOfChain => write!(f, "end of chain"),
            BlockPointer::Unused => write!(f, "unused"),
            BlockPointer::Special => write!(f, "special"),
            BlockPointer::Extension => write!(f, "extension"),
        }
    }
}

/// Blocks of `block_size` needed to hold `size` bytes
pub fn blocks_for(size: u32, block_size: usize) -> usize {
    (size as usize + block_size - 1) / block_size
}
