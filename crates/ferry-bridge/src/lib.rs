//! Host side of a foreign-call boundary between a linear-memory compute module and a
//! dynamically-typed host.
//!
//! All state lives in one explicit [`Boundary`] context object rather than in globals, so several
//! independent boundaries can coexist (and tests stay deterministic). The pieces:
//!
//! - [`HandleTable`]: integer handles for host values the compute side references
//! - marshaling (`pass_string`, `read_string`, `pass_bytes`, optional return slots) through the
//!   compute module's allocator and cached memory views
//! - the call trampoline ([`Boundary::invoke`]) with its single pending-error slot
//! - the closure bridge: reference-counted callbacks addressed by [`ClosureId`]
//! - deferred values, timers, animation frames and microtasks ([`Boundary::pump`])
//! - exported compute-side objects with explicit `free`
//!
//! The boundary is single-threaded (`!Send`): host callbacks may re-enter it, but only on the
//! same thread and only through `&mut Boundary`.

mod boundary;
mod closure;
mod config;
mod deferred;
mod error;
mod functions;
mod handles;
mod intrinsics;
mod marshal;
mod object;
mod schedule;
mod trampoline;
mod value;

pub use boundary::Boundary;
pub use closure::{ClosureArena, ClosureId, ClosureKind, ClosureRef};
pub use config::{BoundaryConfig, MAX_HANDLE_CAPACITY};
pub use deferred::{Deferred, DeferredFuture, Resolver};
pub use error::{BridgeError, Result};
pub use functions::{CallbackFn, DropFn, FunctionTable};
pub use handles::HandleTable;
pub use object::ObjectId;
pub use schedule::{PumpStats, TaskId};
pub use trampoline::{CallResult, Failure, HostOp, HostRegistry, PendingError};
pub use value::{args, HostError, HostObject, HostValue, ValueKind};

pub use ferry_abi::{GuestFnIndex, GuestPtr, Handle};
