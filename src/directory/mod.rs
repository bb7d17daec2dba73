//! Directory Module
//!
//! Named storages and streams, stored as fixed-size records in the
//! directory chain.
//!
//! ## Tree Shape
//! ```text
//!   Root Entry (0)
//!      │ child
//!      ▼
//!   "Book" (1) ──next──▶ "\x05SummaryInformation" (3)
//!      │ child
//!      ▼
//!   "Sheet1" (2)
//! ```
//!
//! A free slot has a zero name length. Removing an entry zeroes its record.

mod entry;
mod tree;

pub use entry::{names_match, validate_name, DirEntry, EntryKind, MAX_NAME_UNITS};
pub use tree::{DirIter, Directory};
