//! Configuration for msole
//!
//! Centralized configuration with sensible defaults.

use crate::error::{OleError, Result};
use crate::format::MAX_BAT_BLOCKS;

/// Main configuration for opening or creating a container
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Access Configuration
    // -------------------------------------------------------------------------
    /// Open existing files read-only even when they are writable
    pub read_only: bool,

    /// `open_path` in write mode creates missing storages and the stream
    pub create_missing: bool,

    // -------------------------------------------------------------------------
    // Allocation Configuration
    // -------------------------------------------------------------------------
    /// Number of big blocks the file grows by when it runs out of space
    pub growth_blocks: u32,

    /// Ceiling on allocation-table descriptor blocks listed in the header
    /// (at most 109; secondary indirection is not supported)
    pub max_bat_blocks: usize,

    // -------------------------------------------------------------------------
    // Durability / Diagnostics
    // -------------------------------------------------------------------------
    /// fsync the file when flushing
    pub sync_on_close: bool,

    /// Re-walk each stream's on-disk chain after every stream operation
    /// and compare it with the handle's block list (slow)
    pub verify_streams: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_only: false,
            create_missing: true,
            growth_blocks: 1,
            max_bat_blocks: MAX_BAT_BLOCKS,
            sync_on_close: true,
            verify_streams: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the on-disk format cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.growth_blocks == 0 {
            return Err(OleError::Config(
                "growth_blocks must be at least 1".to_string(),
            ));
        }
        if self.max_bat_blocks == 0 || self.max_bat_blocks > MAX_BAT_BLOCKS {
            return Err(OleError::Config(format!(
                "max_bat_blocks must be within 1..={}, got {}",
                MAX_BAT_BLOCKS, self.max_bat_blocks
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Open existing containers read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Create missing path components when opening a stream for writing
    pub fn create_missing(mut self, create: bool) -> Self {
        self.config.create_missing = create;
        self
    }

    /// Set the file growth increment (in big blocks)
    pub fn growth_blocks(mut self, blocks: u32) -> Self {
        self.config.growth_blocks = blocks;
        self
    }

    /// Set the allocation-table descriptor ceiling
    pub fn max_bat_blocks(mut self, count: usize) -> Self {
        self.config.max_bat_blocks = count;
        self
    }

    /// fsync on flush/close
    pub fn sync_on_close(mut self, sync: bool) -> Self {
        self.config.sync_on_close = sync;
        self
    }

    /// Enable stream chain verification after every stream operation
    pub fn verify_streams(mut self, verify: bool) -> Self {
        self.config.verify_streams = verify;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
