//! Compute-side function table.
//!
//! The compute module exports callback bodies and destructors as entries of an indirect function
//! table; the boundary only ever stores their indices. Index 0 is never assigned so a zeroed
//! field reads as "no function".

use std::rc::Rc;

use ferry_abi::{GuestFnIndex, GuestPtr};

use crate::boundary::Boundary;
use crate::value::HostValue;
use crate::{BridgeError, Result};

/// Callback body: receives the closure's context pointer and the host-supplied arguments.
/// `Err` carries a thrown value.
pub type CallbackFn = dyn Fn(&mut Boundary, GuestPtr, &[HostValue]) -> std::result::Result<HostValue, HostValue>;

/// Destructor / free function: receives the context (or object) pointer it owns.
pub type DropFn = dyn Fn(&mut Boundary, GuestPtr);

#[derive(Clone)]
enum Entry {
    Callback(Rc<CallbackFn>),
    Drop(Rc<DropFn>),
}

#[derive(Default)]
pub struct FunctionTable {
    entries: Vec<Entry>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback<F>(&mut self, body: F) -> GuestFnIndex
    where
        F: Fn(&mut Boundary, GuestPtr, &[HostValue]) -> std::result::Result<HostValue, HostValue>
            + 'static,
    {
        self.push(Entry::Callback(Rc::new(body)))
    }

    pub fn register_drop<F>(&mut self, dtor: F) -> GuestFnIndex
    where
        F: Fn(&mut Boundary, GuestPtr) + 'static,
    {
        self.push(Entry::Drop(Rc::new(dtor)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn callback(&self, index: GuestFnIndex) -> Result<Rc<CallbackFn>> {
        match self.entry(index) {
            Some(Entry::Callback(body)) => Ok(Rc::clone(body)),
            _ => Err(BridgeError::UnknownFunction(index)),
        }
    }

    pub(crate) fn drop_fn(&self, index: GuestFnIndex) -> Result<Rc<DropFn>> {
        match self.entry(index) {
            Some(Entry::Drop(dtor)) => Ok(Rc::clone(dtor)),
            _ => Err(BridgeError::UnknownFunction(index)),
        }
    }

    fn entry(&self, index: GuestFnIndex) -> Option<&Entry> {
        let slot = (index.raw() as usize).checked_sub(1)?;
        self.entries.get(slot)
    }

    fn push(&mut self, entry: Entry) -> GuestFnIndex {
        self.entries.push(entry);
        GuestFnIndex::from_raw(self.entries.len() as u32)
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}
