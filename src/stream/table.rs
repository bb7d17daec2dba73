//! Open handle table

use crate::error::{OleError, Result};

use super::{StreamHandle, StreamMode};

/// Identifies an open stream. Stale ids (after close) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    slot: usize,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    handle: Option<StreamHandle>,
}

/// Slab of open handles, reusing closed slots
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
}

impl HandleTable {
    pub fn insert(&mut self, handle: StreamHandle) -> StreamId {
        let slot = match self.slots.iter().position(|s| s.handle.is_none()) {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let entry = &mut self.slots[slot];
        entry.handle = Some(handle);
        StreamId {
            slot,
            generation: entry.generation,
        }
    }

    fn slot(&self, id: StreamId) -> Option<&Slot> {
        self.slots
            .get(id.slot)
            .filter(|s| s.generation == id.generation)
    }

    pub fn get(&self, id: StreamId) -> Result<&StreamHandle> {
        self.slot(id)
            .and_then(|s| s.handle.as_ref())
            .ok_or(OleError::InvalidHandle)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Result<&mut StreamHandle> {
        self.slots
            .get_mut(id.slot)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.handle.as_mut())
            .ok_or(OleError::InvalidHandle)
    }

    pub fn remove(&mut self, id: StreamId) -> Result<StreamHandle> {
        let slot = self
            .slots
            .get_mut(id.slot)
            .filter(|s| s.generation == id.generation)
            .ok_or(OleError::InvalidHandle)?;
        let handle = slot.handle.take().ok_or(OleError::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamHandle> {
        self.slots.iter().filter_map(|s| s.handle.as_ref())
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.handle.is_some())
            .map(|(slot, s)| StreamId {
                slot,
                generation: s.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Any handle open on directory entry `entry`
    pub fn is_open(&self, entry: u32) -> bool {
        self.iter().any(|h| h.entry() == entry)
    }

    /// A write handle open on directory entry `entry`
    pub fn writer_open(&self, entry: u32) -> bool {
        self.iter()
            .any(|h| h.entry() == entry && h.mode() == StreamMode::Write)
    }
}
