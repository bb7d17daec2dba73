//! Error types for msole
//!
//! Provides a unified error type for all container operations.

use thiserror::Error;

/// Result type alias using OleError
pub type Result<T> = std::result::Result<T, OleError>;

/// Unified error type for compound container operations
#[derive(Debug, Error)]
pub enum OleError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors (fatal for open)
    // -------------------------------------------------------------------------
    #[error("Invalid container format: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Allocation Errors
    // -------------------------------------------------------------------------
    /// A chain hit UNUSED/SPECIAL where a continuation or end was expected,
    /// looped, or pointed outside the file.
    #[error("Corrupt chain at block {block}: {detail}")]
    CorruptChain { block: u32, detail: String },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    // -------------------------------------------------------------------------
    // Argument Errors (raised before any mutation)
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Container is open read-only")]
    ReadOnly,

    #[error("Invalid or closed stream handle")]
    InvalidHandle,

    #[error("Stream entry {0} is already open")]
    StreamBusy(u32),

    // -------------------------------------------------------------------------
    // Directory Errors
    // -------------------------------------------------------------------------
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage is not empty: {0}")]
    NotEmpty(String),

    /// Removing an entry that still has siblings is not supported.
    #[error("Entry {0} has siblings and cannot be removed")]
    HasSiblings(u32),

    // -------------------------------------------------------------------------
    // Stream Errors
    // -------------------------------------------------------------------------
    #[error("Short read: requested {requested} bytes, {available} available")]
    ShortRead { requested: usize, available: usize },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OleError {
    pub(crate) fn corrupt(block: u32, detail: impl Into<String>) -> Self {
        OleError::CorruptChain {
            block,
            detail: detail.into(),
        }
    }
}

impl From<OleError> for std::io::Error {
    fn from(err: OleError) -> Self {
        match err {
            OleError::Io(e) => e,
            OleError::ShortRead { .. } => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err)
            }
            OleError::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            OleError::ReadOnly => std::io::Error::new(std::io::ErrorKind::PermissionDenied, err),
            OleError::InvalidArgument(_) | OleError::InvalidHandle => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
            }
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
