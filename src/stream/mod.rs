//! Stream Module
//!
//! Open stream handles: a cursor over the materialized block list of one
//! stream entry.
//!
//! ## Backing
//! ```text
//!   size < 4096   small blocks (64 bytes) inside the small-block file
//!   size >= 4096  big blocks (512 bytes) straight from the file
//! ```
//!
//! A stream that grows past the threshold while being written is moved to
//! big blocks before the write returns. The move is one-way.

mod handle;
mod io;
mod table;

pub use handle::StreamHandle;
pub use io::StreamIo;
pub use table::StreamId;

pub(crate) use handle::{release_stale_chain, BlockStore};
pub(crate) use table::HandleTable;

use crate::format::{BIG_BLOCK_SIZE, BIG_BLOCK_THRESHOLD, SMALL_BLOCK_SIZE};

/// Access mode of an open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Read,
    Write,
}

/// Block size a stream is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Small,
    Big,
}

impl Backing {
    /// Backing a stream of `size` bytes lives in
    pub fn for_size(size: u32) -> Self {
        if size >= BIG_BLOCK_THRESHOLD {
            Backing::Big
        } else {
            Backing::Small
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            Backing::Small => SMALL_BLOCK_SIZE,
            Backing::Big => BIG_BLOCK_SIZE,
        }
    }
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::Small => write!(f, "small"),
            Backing::Big => write!(f, "big"),
        }
    }
}
