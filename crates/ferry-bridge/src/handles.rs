use ferry_abi::Handle;

use crate::value::HostValue;
use crate::{BridgeError, Result};

#[derive(Debug)]
enum Slot {
    /// Index 0; never handed out.
    Reserved,
    Live(HostValue),
    Free { next: Option<u32> },
}

/// Slot table mapping [`Handle`]s to host values.
///
/// Released slots are threaded onto a free list and reused LIFO, so a handle value can come back
/// after it has been released, but never while it is still live.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.saturating_add(1));
        slots.push(Slot::Reserved);
        Self {
            slots,
            free_head: None,
            live: 0,
        }
    }

    /// Like [`HandleTable::with_capacity`], but a preallocation the allocator refuses is an error.
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity.saturating_add(1))
            .map_err(|err| {
                BridgeError::Config(format!("cannot preallocate {capacity} handle slots: {err}"))
            })?;
        slots.push(Slot::Reserved);
        Ok(Self {
            slots,
            free_head: None,
            live: 0,
        })
    }

    pub fn alloc(&mut self, value: HostValue) -> Handle {
        self.live += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            if let Slot::Free { next } = *slot {
                self.free_head = next;
                *slot = Slot::Live(value);
                tracing::trace!(handle = index, reused = true, "handle allocated");
                return Handle::from_raw(index);
            }
            debug_assert!(false, "free list points at a non-free slot {index}");
            self.free_head = None;
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Live(value));
        tracing::trace!(handle = index, reused = false, "handle allocated");
        Handle::from_raw(index)
    }

    pub fn get(&self, handle: Handle) -> Result<&HostValue> {
        match self.slots.get(handle.index()) {
            Some(Slot::Live(value)) => Ok(value),
            _ => Err(BridgeError::InvalidHandle(handle)),
        }
    }

    /// Read the value and release the slot in one step.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue> {
        let index = handle.index();
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Live(_)) => {
                let old = std::mem::replace(
                    slot,
                    Slot::Free {
                        next: self.free_head,
                    },
                );
                self.free_head = Some(handle.raw());
                self.live -= 1;
                tracing::trace!(handle = handle.raw(), "handle released");
                match old {
                    Slot::Live(value) => Ok(value),
                    _ => Err(BridgeError::InvalidHandle(handle)),
                }
            }
            _ => Err(BridgeError::InvalidHandle(handle)),
        }
    }

    /// Releasing a handle that is not live (including a double release) is an error.
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        self.take(handle).map(drop)
    }

    /// Allocate a second handle referring to the same value.
    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle> {
        let value = self.get(handle)?.clone();
        Ok(self.alloc(value))
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Slots ever allocated (live or free), excluding the reserved one.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }
}
