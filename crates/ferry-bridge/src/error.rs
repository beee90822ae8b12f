use ferry_abi::{GuestFnIndex, GuestPtr, Handle};
use ferry_mem::MemoryError;
use thiserror::Error;

use crate::closure::ClosureId;
use crate::object::ObjectId;
use crate::value::{HostValue, ValueKind};

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Reserved, released or never-allocated handle. Always a bug on the caller's side.
    #[error("invalid handle {0:?}")]
    InvalidHandle(Handle),

    #[error("invalid UTF-8 at {ptr:#x} (+{len} bytes)")]
    Decode {
        ptr: GuestPtr,
        len: u32,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A value thrown by host code, drained from the pending-error slot.
    #[error("host error: {0}")]
    Host(HostValue),

    /// Raised by the compute module through the `throw` intrinsic.
    #[error("{0}")]
    Thrown(String),

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("unknown host operation `{0}`")]
    UnknownOperation(String),

    #[error("no compute-side function registered at {0:?}")]
    UnknownFunction(GuestFnIndex),

    #[error("closure {0} has been destroyed")]
    ClosureDestroyed(ClosureId),

    #[error("closure {0} invoked recursively")]
    RecursiveClosureCall(ClosureId),

    #[error("exported object {0} has already been freed")]
    ObjectFreed(ObjectId),

    #[error("handle {0:?} does not refer to a deferred value")]
    NotDeferred(Handle),

    #[error("invalid boundary configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
