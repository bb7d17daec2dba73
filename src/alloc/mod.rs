//! Allocation Module
//!
//! Block chains and the tables that describe them.
//!
//! ## Two granularities
//! ```text
//! BAT (big blocks, 512 bytes)            SBAT (small blocks, 64 bytes)
//! ┌──────────────────────────┐           ┌──────────────────────────┐
//! │ descriptor blocks listed │           │ descriptor chain (big    │
//! │ in the header @0x4c      │           │ blocks) from header 0x3c │
//! │ slot i = next(i)         │           │ slot i = next(i)         │
//! └──────────────────────────┘           └──────────────────────────┘
//!                                        SBF payload chain (big blocks)
//!                                        from the root entry: 8 small
//!                                        blocks per big block
//! ```
//!
//! A chain is followed slot by slot until END_OF_CHAIN. Any other sentinel
//! in the middle of a chain, a link past the end of the file, or a chain
//! longer than the table itself is reported as a corrupt chain.
//!
//! Both allocators hand out the lowest free index first and keep a scan
//! hint below which every slot is known to be in use.

mod bat;
mod sbat;

pub use bat::AllocationTable;
pub use sbat::SmallBlockTable;
