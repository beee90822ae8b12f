//! Compute-side objects exported to the host.
//!
//! The host holds an [`ObjectId`]; the object itself stays in compute memory and is released
//! through the free function it was wrapped with. Slots are reused, but every reuse bumps the
//! slot's generation, so a freed id stays freed.

use std::fmt;

use ferry_abi::{GuestFnIndex, GuestPtr};

use crate::boundary::Boundary;
use crate::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
pub(crate) struct ExportedObject {
    pub(crate) ptr: GuestPtr,
    free_fn: GuestFnIndex,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<ExportedObject>,
}

#[derive(Debug, Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ObjectTable {
    fn insert(&mut self, object: ExportedObject) -> ObjectId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            return ObjectId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
        });
        ObjectId {
            index: self.slots.len() as u32 - 1,
            generation: 0,
        }
    }

    fn get(&self, id: ObjectId) -> Option<&ExportedObject> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.object.as_ref()
    }

    pub(crate) fn take(&mut self, id: ObjectId) -> Option<ExportedObject> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(object)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live
    }

    /// Slots ever allocated, live or free.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn live_ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.object.is_some())
            .map(|(index, slot)| ObjectId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}

impl Boundary {
    /// Take ownership of the compute-side object at `ptr`, released later with `free_fn`.
    pub fn wrap_object(&mut self, ptr: GuestPtr, free_fn: GuestFnIndex) -> Result<ObjectId> {
        self.functions.drop_fn(free_fn)?;
        let id = self.objects.insert(ExportedObject { ptr, free_fn });
        tracing::trace!(object = %id, ptr, "object exported");
        Ok(id)
    }

    pub fn object_ptr(&self, id: ObjectId) -> Result<GuestPtr> {
        self.objects
            .get(id)
            .map(|object| object.ptr)
            .ok_or(BridgeError::ObjectFreed(id))
    }

    pub fn live_objects(&self) -> usize {
        self.objects.live_count()
    }

    /// Object slots ever allocated; freed slots are reused.
    pub fn object_capacity(&self) -> usize {
        self.objects.capacity()
    }

    /// Run the object's free function. Freeing twice is a no-op.
    pub fn free_object(&mut self, id: ObjectId) {
        match self.objects.take(id) {
            Some(object) => self.run_object_free(id, object),
            None => tracing::trace!(object = %id, "free of freed object ignored"),
        }
    }

    /// Give the pointer back to the compute side without freeing it.
    pub fn destroy_into_raw(&mut self, id: ObjectId) -> Result<GuestPtr> {
        let object = self.objects.take(id).ok_or(BridgeError::ObjectFreed(id))?;
        Ok(object.ptr)
    }

    pub(crate) fn run_object_free(&mut self, id: ObjectId, object: ExportedObject) {
        match self.functions.drop_fn(object.free_fn) {
            Ok(free) => free(self, object.ptr),
            Err(err) => tracing::warn!(object = %id, %err, "free function missing"),
        }
        tracing::debug!(object = %id, ptr = object.ptr, "exported object freed");
    }
}
