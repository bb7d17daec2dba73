//! Container header
//!
//! The first 512 bytes of the file. Only a handful of fields carry state;
//! the rest are constants written at create time and ignored on open.

use bytes::{Buf, BufMut};

use crate::error::{OleError, Result};

use super::address::big_block_offset;
use super::{BIG_BLOCK_SIZE, BIG_BLOCK_THRESHOLD, END_OF_CHAIN, MAGIC, MAX_BAT_BLOCKS, UNUSED_BLOCK};

pub(crate) const OFFSET_BAT_COUNT: usize = 0x2c;
pub(crate) const OFFSET_ROOT_START: usize = 0x30;
pub(crate) const OFFSET_SBAT_START: usize = 0x3c;
pub(crate) const OFFSET_SBAT_COUNT: usize = 0x40;
pub(crate) const OFFSET_BAT_LIST: usize = 0x4c;

const REVISION_WORD: u32 = 0x0003_003e;
const BYTE_ORDER_WORD: u32 = 0x0009_fffe;
const SMALL_SHIFT_WORD: u32 = 6;

/// Parsed header fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Number of allocation-table descriptor blocks
    pub bat_count: u32,
    /// First block of the directory chain
    pub root_start: u32,
    /// First block of the small-block table chain
    pub sbat_start: u32,
    /// Blocks in the small-block table chain
    pub sbat_count: u32,
    /// Secondary table list start (always END_OF_CHAIN here)
    pub extension_start: u32,
    /// Secondary table list length (must be 0)
    pub extension_count: u32,
    /// Descriptor block indices, `bat_count` long
    pub bat_list: Vec<u32>,
}

impl Header {
    /// Header of a freshly created container: one descriptor at block 0,
    /// directory at block 1, no small-block table.
    pub fn bootstrap() -> Self {
        Self {
            bat_count: 1,
            root_start: 1,
            sbat_start: END_OF_CHAIN,
            sbat_count: 0,
            extension_start: END_OF_CHAIN,
            extension_count: 0,
            bat_list: vec![0],
        }
    }

    /// Parse and validate the header at the front of a whole-file image
    pub fn parse(file: &[u8]) -> Result<Self> {
        if file.len() <= OFFSET_BAT_LIST {
            return Err(OleError::Format(format!(
                "file too short for a header ({} bytes)",
                file.len()
            )));
        }

        let mut buf = file;
        let magic = [buf.get_u32_le(), buf.get_u32_le()];
        if magic != MAGIC {
            return Err(OleError::Format(format!(
                "bad magic {:08x} {:08x}",
                magic[0], magic[1]
            )));
        }

        let mut buf = &file[OFFSET_BAT_COUNT..];
        let bat_count = buf.get_u32_le();
        let root_start = buf.get_u32_le();
        buf.advance(8); // 0x34, 0x38
        let sbat_start = buf.get_u32_le();
        let sbat_count = buf.get_u32_le();
        let extension_start = buf.get_u32_le();
        let extension_count = buf.get_u32_le();

        if extension_count != 0 {
            return Err(OleError::Format(format!(
                "secondary allocation tables are not supported ({} present)",
                extension_count
            )));
        }
        if bat_count == 0 || bat_count as usize > MAX_BAT_BLOCKS {
            return Err(OleError::Format(format!(
                "allocation table descriptor count {} outside 1..={}",
                bat_count, MAX_BAT_BLOCKS
            )));
        }
        if file.len() < OFFSET_BAT_LIST + bat_count as usize * 4 {
            return Err(OleError::Format(
                "header truncated inside the descriptor list".to_string(),
            ));
        }

        let mut bat_list = Vec::with_capacity(bat_count as usize);
        let mut buf = &file[OFFSET_BAT_LIST..];
        for i in 0..bat_count {
            let block = buf.get_u32_le();
            if big_block_offset(block) + BIG_BLOCK_SIZE > file.len() {
                return Err(OleError::Format(format!(
                    "descriptor {} points at block {:#x} outside the file",
                    i, block
                )));
            }
            bat_list.push(block);
        }

        Ok(Self {
            bat_count,
            root_start,
            sbat_start,
            sbat_count,
            extension_start,
            extension_count,
            bat_list,
        })
    }

    /// Encode the full 512-byte header, constants included
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BIG_BLOCK_SIZE);
        out.put_u32_le(MAGIC[0]);
        out.put_u32_le(MAGIC[1]);
        out.put_bytes(0, 0x10); // class id
        out.put_u32_le(REVISION_WORD);
        out.put_u32_le(BYTE_ORDER_WORD);
        out.put_u32_le(SMALL_SHIFT_WORD);
        out.put_bytes(0, 8);
        out.put_u32_le(self.bat_count);
        out.put_u32_le(self.root_start);
        out.put_u32_le(0);
        out.put_u32_le(BIG_BLOCK_THRESHOLD);
        out.put_u32_le(self.sbat_start);
        out.put_u32_le(self.sbat_count);
        out.put_u32_le(self.extension_start);
        out.put_u32_le(self.extension_count);
        for i in 0..MAX_BAT_BLOCKS {
            out.put_u32_le(self.bat_list.get(i).copied().unwrap_or(UNUSED_BLOCK));
        }
        debug_assert_eq!(out.len(), BIG_BLOCK_SIZE);
        out
    }
}
