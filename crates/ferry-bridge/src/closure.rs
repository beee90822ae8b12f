//! Closure bridge.
//!
//! A closure is a compute-side callback body (function index) plus the context pointer it closes
//! over, made callable from the host. Its state lives in an arena addressed by a generational
//! [`ClosureId`] and is reference counted:
//!
//! - creation holds one reference, released by [`Boundary::dispose_closure`]
//! - every invocation holds one more for the duration of the call
//!
//! When the count reaches zero the state is removed from the arena and then its destructor runs,
//! exactly once.

use std::fmt;

use ferry_abi::{GuestFnIndex, GuestPtr, Handle};

use crate::boundary::Boundary;
use crate::value::{HostObject, HostValue};
use crate::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId {
    index: u32,
    generation: u32,
}

impl ClosureId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ClosureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// May be invoked again while a call is already running.
    Shared,
    /// Single active call at a time; a nested call of the same closure is rejected.
    Exclusive,
}

/// The host-side function value wrapping a closure. Stored in the handle table as a
/// [`HostObject`], so `is_function` and `debug_string` recognize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureRef(pub ClosureId);

#[derive(Debug)]
pub(crate) struct ClosureState {
    /// Cleared to NULL while an exclusive closure is running.
    pub(crate) invoke: GuestFnIndex,
    pub(crate) ctx: GuestPtr,
    pub(crate) dtor: GuestFnIndex,
    pub(crate) kind: ClosureKind,
    pub(crate) count: u32,
    pub(crate) disposal_requested: bool,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    state: Option<ClosureState>,
}

#[derive(Debug, Default)]
pub struct ClosureArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
    destroyed: u64,
}

impl ClosureArena {
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Closures removed from the arena so far.
    pub fn destroyed_count(&self) -> u64 {
        self.destroyed
    }

    pub fn is_live(&self, id: ClosureId) -> bool {
        self.get(id).is_some()
    }

    /// Current reference count, or `None` once destroyed.
    pub fn ref_count(&self, id: ClosureId) -> Option<u32> {
        self.get(id).map(|state| state.count)
    }

    pub fn is_disposal_pending(&self, id: ClosureId) -> bool {
        self.get(id).is_some_and(|state| state.disposal_requested)
    }

    fn insert(&mut self, state: ClosureState) -> ClosureId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.state = Some(state);
            return ClosureId {
                index,
                generation: entry.generation,
            };
        }
        self.entries.push(Entry {
            generation: 0,
            state: Some(state),
        });
        ClosureId {
            index: self.entries.len() as u32 - 1,
            generation: 0,
        }
    }

    fn get(&self, id: ClosureId) -> Option<&ClosureState> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.state.as_ref()
    }

    fn get_mut(&mut self, id: ClosureId) -> Option<&mut ClosureState> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.state.as_mut()
    }

    pub(crate) fn remove(&mut self, id: ClosureId) -> Option<ClosureState> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let state = entry.state.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        self.destroyed += 1;
        Some(state)
    }

    pub(crate) fn live_ids(&self) -> Vec<ClosureId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.state.is_some())
            .map(|(index, entry)| ClosureId {
                index: index as u32,
                generation: entry.generation,
            })
            .collect()
    }
}

impl Boundary {
    /// Register a closure over `ctx`. `dtor` may be [`GuestFnIndex::NULL`] when the context
    /// owns nothing.
    pub fn create_closure(
        &mut self,
        invoke: GuestFnIndex,
        ctx: GuestPtr,
        dtor: GuestFnIndex,
        kind: ClosureKind,
    ) -> Result<ClosureId> {
        self.functions.callback(invoke)?;
        if !dtor.is_null() {
            self.functions.drop_fn(dtor)?;
        }

        let id = self.closures.insert(ClosureState {
            invoke,
            ctx,
            dtor,
            kind,
            count: 1,
            disposal_requested: false,
        });
        tracing::trace!(closure = %id, ?kind, ctx, "closure created");
        Ok(id)
    }

    /// Store a function value for `id` in the handle table so it can be passed to host code.
    pub fn closure_handle(&mut self, id: ClosureId) -> Result<Handle> {
        if !self.closures.is_live(id) {
            return Err(BridgeError::ClosureDestroyed(id));
        }
        Ok(self
            .handles
            .alloc(HostValue::Object(HostObject::new(ClosureRef(id)))))
    }

    /// Call the closure's body with `args`.
    ///
    /// The state is pinned for the duration of the call, so a disposal requested from inside the
    /// body (or from a nested call) is deferred until the outermost active call returns.
    pub fn invoke_closure(&mut self, id: ClosureId, args: &[HostValue]) -> Result<HostValue> {
        let (invoke, ctx, kind) = {
            let state = self
                .closures
                .get_mut(id)
                .ok_or(BridgeError::ClosureDestroyed(id))?;
            if state.invoke.is_null() {
                return Err(BridgeError::RecursiveClosureCall(id));
            }
            state.count += 1;
            let invoke = state.invoke;
            if state.kind == ClosureKind::Exclusive {
                state.invoke = GuestFnIndex::NULL;
            }
            (invoke, state.ctx, state.kind)
        };

        let result = match self.functions.callback(invoke) {
            Ok(body) => body(self, ctx, args).map_err(BridgeError::Host),
            Err(err) => Err(err),
        };

        if kind == ClosureKind::Exclusive {
            if let Some(state) = self.closures.get_mut(id) {
                state.invoke = invoke;
            }
        }
        self.unref_closure(id);
        result
    }

    /// Invoke the closure a function value refers to.
    pub fn invoke_function(&mut self, function: &HostValue, args: &[HostValue]) -> Result<HostValue> {
        match function.downcast_ref::<ClosureRef>() {
            Some(&ClosureRef(id)) => self.invoke_closure(id, args),
            None => Err(BridgeError::TypeMismatch {
                expected: crate::ValueKind::Object,
                found: function.kind(),
            }),
        }
    }

    /// Drop the creation reference. Idempotent; a no-op on destroyed ids.
    pub fn dispose_closure(&mut self, id: ClosureId) {
        let Some(state) = self.closures.get_mut(id) else {
            tracing::trace!(closure = %id, "dispose of destroyed closure ignored");
            return;
        };
        if state.disposal_requested {
            return;
        }
        state.disposal_requested = true;
        if state.count > 1 {
            tracing::trace!(closure = %id, refs = state.count, "closure disposal deferred");
        }
        self.unref_closure(id);
    }

    fn unref_closure(&mut self, id: ClosureId) {
        let Some(state) = self.closures.get_mut(id) else {
            return;
        };
        state.count -= 1;
        if state.count > 0 {
            return;
        }
        if let Some(state) = self.closures.remove(id) {
            self.run_closure_dtor(id, state);
        }
    }

    pub(crate) fn run_closure_dtor(&mut self, id: ClosureId, state: ClosureState) {
        if !state.dtor.is_null() {
            match self.functions.drop_fn(state.dtor) {
                Ok(dtor) => dtor(self, state.ctx),
                Err(err) => tracing::warn!(closure = %id, %err, "closure destructor missing"),
            }
        }
        tracing::debug!(closure = %id, "closure destroyed");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::BoundaryConfig;

    struct Fixture {
        boundary: Boundary,
        calls: Rc<Cell<u32>>,
        drops: Rc<RefCell<Vec<GuestPtr>>>,
        body: GuestFnIndex,
        dtor: GuestFnIndex,
    }

    fn fixture() -> Fixture {
        let mut boundary = Boundary::new(BoundaryConfig::default()).unwrap();
        let calls = Rc::new(Cell::new(0));
        let drops = Rc::new(RefCell::new(Vec::new()));
        let body = {
            let calls = Rc::clone(&calls);
            boundary.register_callback(move |_, ctx, args| {
                calls.set(calls.get() + 1);
                Ok(HostValue::from(ctx + args.len() as u32))
            })
        };
        let dtor = {
            let drops = Rc::clone(&drops);
            boundary.register_drop(move |_, ctx| drops.borrow_mut().push(ctx))
        };
        Fixture {
            boundary,
            calls,
            drops,
            body,
            dtor,
        }
    }

    #[test]
    fn invoke_then_dispose_runs_dtor_once() {
        let mut f = fixture();
        let id = f
            .boundary
            .create_closure(f.body, 100, f.dtor, ClosureKind::Shared)
            .unwrap();
        let out = f
            .boundary
            .invoke_closure(id, &[HostValue::Null, HostValue::Null])
            .unwrap();
        assert_eq!(out, HostValue::from(102u32));
        assert_eq!(f.boundary.closures().ref_count(id), Some(1));

        f.boundary.dispose_closure(id);
        f.boundary.dispose_closure(id);
        assert_eq!(*f.drops.borrow(), vec![100]);
        assert!(!f.boundary.closures().is_live(id));
        assert!(matches!(
            f.boundary.invoke_closure(id, &[]),
            Err(BridgeError::ClosureDestroyed(_))
        ));
        assert_eq!(f.calls.get(), 1);
    }

    #[test]
    fn disposal_during_call_is_deferred() {
        let mut f = fixture();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let body = {
            let observed = Rc::clone(&observed);
            let drops = Rc::clone(&f.drops);
            f.boundary.register_callback(move |b, ctx, _| {
                let id = ClosureId {
                    index: 0,
                    generation: 0,
                };
                b.dispose_closure(id);
                observed
                    .borrow_mut()
                    .push((b.closures().is_live(id), drops.borrow().len()));
                Ok(HostValue::from(ctx))
            })
        };
        let id = f
            .boundary
            .create_closure(body, 7, f.dtor, ClosureKind::Shared)
            .unwrap();
        assert_eq!(id.index(), 0);

        f.boundary.invoke_closure(id, &[]).unwrap();
        assert_eq!(*observed.borrow(), vec![(true, 0)]);
        assert_eq!(*f.drops.borrow(), vec![7]);
        assert!(!f.boundary.closures().is_live(id));
    }

    #[test]
    fn exclusive_closure_rejects_reentry() {
        let mut f = fixture();
        let nested = Rc::new(RefCell::new(None));
        let body = {
            let nested = Rc::clone(&nested);
            f.boundary.register_callback(move |b, _, args| {
                if args.is_empty() {
                    let id = ClosureId {
                        index: 0,
                        generation: 0,
                    };
                    let result = b.invoke_closure(id, &[HostValue::Null]);
                    *nested.borrow_mut() = Some(matches!(
                        result,
                        Err(BridgeError::RecursiveClosureCall(_))
                    ));
                }
                Ok(HostValue::Undefined)
            })
        };
        let id = f
            .boundary
            .create_closure(body, 0, GuestFnIndex::NULL, ClosureKind::Exclusive)
            .unwrap();

        f.boundary.invoke_closure(id, &[]).unwrap();
        assert_eq!(*nested.borrow(), Some(true));
        // Restored after the call.
        f.boundary.invoke_closure(id, &[HostValue::Null]).unwrap();
        assert_eq!(f.boundary.closures().ref_count(id), Some(1));
    }

    #[test]
    fn shared_closure_allows_reentry() {
        let mut f = fixture();
        let depth = Rc::new(Cell::new(0u32));
        let body = {
            let depth = Rc::clone(&depth);
            f.boundary.register_callback(move |b, _, _| {
                let id = ClosureId {
                    index: 0,
                    generation: 0,
                };
                depth.set(depth.get() + 1);
                if depth.get() < 3 {
                    b.invoke_closure(id, &[])
                        .map_err(|err| HostValue::error("Error", err.to_string()))?;
                }
                Ok(HostValue::from(b.closures().ref_count(id).unwrap_or(0)))
            })
        };
        let id = f
            .boundary
            .create_closure(body, 0, GuestFnIndex::NULL, ClosureKind::Shared)
            .unwrap();
        let outer_refs = f.boundary.invoke_closure(id, &[]).unwrap();
        assert_eq!(depth.get(), 3);
        assert_eq!(outer_refs, HostValue::from(2u32));
    }

    #[test]
    fn thrown_values_surface_as_host_errors() {
        let mut f = fixture();
        let body = f
            .boundary
            .register_callback(|_, _, _| Err(HostValue::error("RangeError", "nope")));
        let id = f
            .boundary
            .create_closure(body, 0, f.dtor, ClosureKind::Shared)
            .unwrap();
        let err = f.boundary.invoke_closure(id, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Host(HostValue::Error(ref e)) if e.name == "RangeError"));
        assert_eq!(f.boundary.closures().ref_count(id), Some(1));
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut f = fixture();
        let old = f
            .boundary
            .create_closure(f.body, 1, f.dtor, ClosureKind::Shared)
            .unwrap();
        f.boundary.dispose_closure(old);
        let new = f
            .boundary
            .create_closure(f.body, 2, f.dtor, ClosureKind::Shared)
            .unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);

        f.boundary.dispose_closure(old);
        assert!(f.boundary.closures().is_live(new));
        assert!(f.boundary.invoke_closure(old, &[]).is_err());
        assert_eq!(*f.drops.borrow(), vec![1]);
    }

    #[test]
    fn create_rejects_unregistered_functions() {
        let mut f = fixture();
        assert!(matches!(
            f.boundary
                .create_closure(f.dtor, 0, GuestFnIndex::NULL, ClosureKind::Shared),
            Err(BridgeError::UnknownFunction(_))
        ));
        assert!(f
            .boundary
            .create_closure(f.body, 0, f.body, ClosureKind::Shared)
            .is_err());
    }

    #[test]
    fn function_values_are_recognized() {
        let mut f = fixture();
        let id = f
            .boundary
            .create_closure(f.body, 5, GuestFnIndex::NULL, ClosureKind::Shared)
            .unwrap();
        let handle = f.boundary.closure_handle(id).unwrap();
        let value = f.boundary.handle_value(handle).unwrap().clone();
        assert!(value.is_function());
        assert_eq!(value.to_string(), "Function");
        assert_eq!(
            f.boundary.invoke_function(&value, &[]).unwrap(),
            HostValue::from(5u32)
        );
    }

    #[test]
    fn leaked_closures_are_finalized_on_drop() {
        let f = fixture();
        let drops = Rc::clone(&f.drops);
        let mut boundary = f.boundary;
        boundary
            .create_closure(f.body, 9, f.dtor, ClosureKind::Shared)
            .unwrap();
        drop(boundary);
        assert_eq!(*drops.borrow(), vec![9]);
    }
}
