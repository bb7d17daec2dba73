//! # msole
//!
//! Read/write access to OLE2 compound document containers: a single file
//! laid out like a tiny filesystem, with named storages (directories) and
//! streams (files), the format underneath legacy spreadsheet documents.
//!
//! - Bit-exact header, allocation tables and directory records
//! - Big (512-byte) and small (64-byte) block allocation
//! - Streams that move to big blocks once they reach 4096 bytes
//! - In-place file growth
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Container                             │
//! │        (open / create / flush / paths / verification)        │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//!        ┌──────────────┐                ┌──────────────┐
//!        │  Directory   │                │   Streams    │
//!        │ (128-byte    │                │ (read/write/ │
//!        │   records)   │                │  seek/grow)  │
//!        └──────┬───────┘                └──────┬───────┘
//!               │                               │
//!               ▼                               ▼
//!        ┌─────────────────────────────────────────────┐
//!        │   Allocation (BAT big blocks, SBAT small)    │
//!        └──────────────────────┬──────────────────────┘
//!                               │
//!                               ▼
//!        ┌─────────────────────────────────────────────┐
//!        │      File image (header + 512-byte blocks)   │
//!        └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use msole::{Container, StreamMode};
//!
//! let mut ole = Container::create("book.xls")?;
//! let id = ole.open_path("Book/Sheet1", StreamMode::Write)?;
//! ole.write(id, b"hello")?;
//! ole.close_stream(id)?;
//! ole.close()?;
//! # Ok::<(), msole::OleError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod format;
pub mod alloc;
pub mod directory;
pub mod stream;
pub mod container;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{OleError, Result};
pub use config::{Config, ConfigBuilder};
pub use container::{Container, EntryStat, VerifyReport};
pub use directory::{DirEntry, EntryKind};
pub use format::BlockPointer;
pub use stream::{Backing, StreamHandle, StreamId, StreamIo, StreamMode};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of msole
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
