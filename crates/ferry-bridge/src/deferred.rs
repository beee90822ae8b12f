use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use ferry_abi::Handle;

use crate::boundary::Boundary;
use crate::closure::ClosureId;
use crate::schedule::{Microtask, MicrotaskQueue};
use crate::trampoline::CallResult;
use crate::value::{HostObject, HostValue};
use crate::{BridgeError, Result};

#[derive(Debug, Clone, Copy)]
struct Continuation {
    on_ok: ClosureId,
    on_err: Option<ClosureId>,
}

impl Continuation {
    fn schedule(self, queue: &MicrotaskQueue, outcome: std::result::Result<&HostValue, &HostValue>) {
        match outcome {
            Ok(value) => queue.push(Microtask {
                closure: self.on_ok,
                arg: value.clone(),
            }),
            Err(reason) => match self.on_err {
                Some(closure) => queue.push(Microtask {
                    closure,
                    arg: reason.clone(),
                }),
                None => tracing::debug!(%reason, "rejection without a handler"),
            },
        }
    }
}

#[derive(Debug)]
enum Settlement {
    Pending(Vec<Continuation>),
    Resolved(HostValue),
    Rejected(HostValue),
}

/// A value the host will produce later. Lives in the handle table; settled through its
/// [`Resolver`].
pub struct Deferred {
    state: RefCell<Settlement>,
    wakers: RefCell<Vec<Waker>>,
}

impl Deferred {
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), Settlement::Pending(_))
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            Settlement::Pending(_) => "pending",
            Settlement::Resolved(_) => "resolved",
            Settlement::Rejected(_) => "rejected",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

/// Settles one [`Deferred`]. Clones share the same deferred; only the first settlement wins.
#[derive(Clone)]
pub struct Resolver {
    deferred: Rc<Deferred>,
    microtasks: MicrotaskQueue,
}

impl Resolver {
    /// Returns `false` if the deferred was already settled.
    pub fn resolve(&self, value: impl Into<HostValue>) -> bool {
        self.settle(Ok(value.into()))
    }

    /// Returns `false` if the deferred was already settled.
    pub fn reject(&self, reason: impl Into<HostValue>) -> bool {
        self.settle(Err(reason.into()))
    }

    pub fn is_settled(&self) -> bool {
        self.deferred.is_settled()
    }

    fn settle(&self, outcome: std::result::Result<HostValue, HostValue>) -> bool {
        let continuations = {
            let mut state = self.deferred.state.borrow_mut();
            if !matches!(*state, Settlement::Pending(_)) {
                return false;
            }
            let settled = match &outcome {
                Ok(value) => Settlement::Resolved(value.clone()),
                Err(reason) => Settlement::Rejected(reason.clone()),
            };
            match std::mem::replace(&mut *state, settled) {
                Settlement::Pending(continuations) => continuations,
                _ => Vec::new(),
            }
        };

        for continuation in continuations {
            continuation.schedule(&self.microtasks, outcome.as_ref());
        }
        for waker in self.deferred.wakers.take() {
            waker.wake();
        }
        true
    }
}

/// Resolves to the settled value, `Err` carrying a rejection reason.
#[derive(Debug)]
pub struct DeferredFuture {
    deferred: Rc<Deferred>,
}

impl Future for DeferredFuture {
    type Output = std::result::Result<HostValue, HostValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &*self.deferred.state.borrow() {
            Settlement::Pending(_) => {
                let mut wakers = self.deferred.wakers.borrow_mut();
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            Settlement::Resolved(value) => Poll::Ready(Ok(value.clone())),
            Settlement::Rejected(reason) => Poll::Ready(Err(reason.clone())),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

impl Boundary {
    /// Allocate a pending deferred. The handle goes to the compute side, the resolver to
    /// whichever host code will produce the value.
    pub fn new_deferred(&mut self) -> (Handle, Resolver) {
        let deferred = Rc::new(Deferred {
            state: RefCell::new(Settlement::Pending(Vec::new())),
            wakers: RefCell::default(),
        });
        let resolver = Resolver {
            deferred: Rc::clone(&deferred),
            microtasks: self.scheduler.microtasks.clone(),
        };
        let handle = self
            .handles
            .alloc(HostValue::Object(HostObject::from_rc(deferred)));
        (handle, resolver)
    }

    /// Check a deferred without blocking.
    ///
    /// A resolved value comes back as a fresh handle; a rejection goes through the pending-error
    /// slot exactly like a failed host call.
    pub fn poll_deferred(&mut self, handle: Handle) -> Result<Poll<CallResult>> {
        let deferred = self.deferred(handle)?;
        let outcome = match &*deferred.state.borrow() {
            Settlement::Pending(_) => return Ok(Poll::Pending),
            Settlement::Resolved(value) => Ok(value.clone()),
            Settlement::Rejected(reason) => Err(reason.clone()),
        };
        Ok(Poll::Ready(self.catch(|_| outcome)))
    }

    /// Run `on_ok` (or `on_err`) as a microtask once the deferred settles. Continuations on an
    /// already-settled deferred are queued immediately.
    pub fn then(
        &mut self,
        handle: Handle,
        on_ok: ClosureId,
        on_err: Option<ClosureId>,
    ) -> Result<()> {
        let deferred = self.deferred(handle)?;
        let continuation = Continuation { on_ok, on_err };
        let mut state = deferred.state.borrow_mut();
        match &mut *state {
            Settlement::Pending(continuations) => continuations.push(continuation),
            Settlement::Resolved(value) => {
                continuation.schedule(&self.scheduler.microtasks, Ok(&*value))
            }
            Settlement::Rejected(reason) => {
                continuation.schedule(&self.scheduler.microtasks, Err(&*reason))
            }
        }
        Ok(())
    }

    /// Host-side future for the deferred at `handle`; independent of the handle's lifetime.
    pub fn deferred_future(&self, handle: Handle) -> Result<DeferredFuture> {
        Ok(DeferredFuture {
            deferred: self.deferred(handle)?,
        })
    }

    fn deferred(&self, handle: Handle) -> Result<Rc<Deferred>> {
        self.handles
            .get(handle)?
            .as_object()
            .and_then(HostObject::downcast_rc::<Deferred>)
            .ok_or(BridgeError::NotDeferred(handle))
    }
}
