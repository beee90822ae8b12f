//! Error-capturing call trampoline.
//!
//! A host operation either returns a value, which is stored as a handle, or throws. A thrown
//! value is boxed as a handle, parked in the single [`PendingError`] slot, and the caller gets
//! the [`Failure`] sentinel instead of a result. The compute side then queries and clears the
//! slot before doing anything else on the boundary.

use std::collections::HashMap;
use std::rc::Rc;

use ferry_abi::Handle;

use crate::boundary::Boundary;
use crate::value::HostValue;
use crate::{BridgeError, Result};

/// Sentinel returned in place of a result when the host call threw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Failure;

/// Outcome of one host call as seen by the compute side.
pub type CallResult = std::result::Result<Handle, Failure>;

/// A named host operation. `Err` carries the thrown value.
pub type HostOp = Rc<dyn Fn(&mut Boundary, &[HostValue]) -> std::result::Result<HostValue, HostValue>>;

#[derive(Default)]
pub struct HostRegistry {
    ops: HashMap<String, HostOp>,
}

impl HostRegistry {
    /// Register `op` under `name`, returning the operation it replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, op: F) -> Option<HostOp>
    where
        F: Fn(&mut Boundary, &[HostValue]) -> std::result::Result<HostValue, HostValue> + 'static,
    {
        self.ops.insert(name.into(), Rc::new(op))
    }

    pub fn resolve(&self, name: &str) -> Option<HostOp> {
        self.ops.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("HostRegistry").field("ops", &names).finish()
    }
}

/// Single-slot holder for the error of the most recent failed host call.
#[derive(Debug, Default)]
pub struct PendingError {
    slot: Option<Handle>,
}

impl PendingError {
    /// The parked error handle, or [`Handle::NONE`].
    pub fn peek(&self) -> Handle {
        self.slot.unwrap_or(Handle::NONE)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    fn store(&mut self, handle: Handle) -> Option<Handle> {
        self.slot.replace(handle)
    }

    fn clear(&mut self) -> Option<Handle> {
        self.slot.take()
    }
}

impl Boundary {
    pub fn ops(&self) -> &HostRegistry {
        &self.ops
    }

    pub fn register_op<F>(&mut self, name: impl Into<String>, op: F)
    where
        F: Fn(&mut Boundary, &[HostValue]) -> std::result::Result<HostValue, HostValue> + 'static,
    {
        let name = name.into();
        if self.ops.register(name.clone(), op).is_some() {
            tracing::debug!(op = %name, "host operation replaced");
        }
    }

    /// Invoke host operation `name` with arguments passed as handles.
    ///
    /// The outer `Result` is for boundary faults (unknown operation, dead argument handle) which
    /// never touch the pending-error slot. The inner one is the host call's outcome.
    pub fn invoke(&mut self, name: &str, args: &[Handle]) -> Result<CallResult> {
        let op = self
            .ops
            .resolve(name)
            .ok_or_else(|| BridgeError::UnknownOperation(name.to_owned()))?;
        let args = args
            .iter()
            .map(|&h| self.handles.get(h).cloned())
            .collect::<Result<Vec<_>>>()?;

        let outcome = self.catch(|boundary| op(boundary, &args));
        if outcome.is_err() {
            tracing::debug!(op = name, error = %self.pending.peek(), "host operation threw");
        }
        Ok(outcome)
    }

    /// Run `f` under the trampoline's error capture.
    pub fn catch<F>(&mut self, f: F) -> CallResult
    where
        F: FnOnce(&mut Boundary) -> std::result::Result<HostValue, HostValue>,
    {
        match f(self) {
            Ok(value) => Ok(self.handles.alloc(value)),
            Err(thrown) => {
                let handle = self.handles.alloc(thrown);
                self.store_pending_error(handle);
                Err(Failure)
            }
        }
    }

    pub(crate) fn store_pending_error(&mut self, handle: Handle) {
        if let Some(previous) = self.pending.store(handle) {
            tracing::warn!(
                previous = %previous,
                current = %handle,
                "pending error overwritten before it was cleared; releasing the older one"
            );
            if let Err(err) = self.handles.release(previous) {
                tracing::warn!(%err, "stale pending error handle");
            }
        }
    }

    /// The pending error handle, or [`Handle::NONE`] when no failure is outstanding.
    pub fn query_pending_error(&self) -> Handle {
        self.pending.peek()
    }

    /// Empty the slot. Ownership of the returned handle moves to the caller.
    pub fn clear_pending_error(&mut self) -> Handle {
        self.pending.clear().unwrap_or(Handle::NONE)
    }

    /// Clear the slot and release its handle, returning the thrown value.
    ///
    /// Fails with [`BridgeError::InvalidHandle`] if the parked handle was already released.
    pub fn take_pending_error(&mut self) -> Result<Option<HostValue>> {
        match self.pending.clear() {
            Some(handle) => self.handles.take(handle).map(Some),
            None => Ok(None),
        }
    }

    /// Invoke `name` with plain values and run the whole drain protocol.
    ///
    /// A thrown value surfaces as [`BridgeError::Host`]; the slot is empty afterwards either way.
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<HostValue> {
        let handles: Vec<Handle> = args
            .iter()
            .map(|value| self.handles.alloc(value.clone()))
            .collect();
        let outcome = self.invoke(name, &handles);
        for handle in handles {
            self.handles.release(handle)?;
        }

        match outcome? {
            Ok(result) => self.handles.take(result),
            Err(Failure) => {
                let thrown = self
                    .take_pending_error()?
                    .ok_or(BridgeError::InvalidHandle(Handle::NONE))?;
                Err(BridgeError::Host(thrown))
            }
        }
    }
}
