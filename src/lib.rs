//! A compute module and its host exchanging values across a linear-memory boundary.
//!
//! - [`abi`]: handles, guest pointers and the return-slot layout both sides agree on.
//! - [`mem`]: the growable linear memory, typed views over it and the guest allocator.
//! - [`bridge`]: the [`Boundary`] itself (handle table, marshaling, host calls with the
//!   pending-error slot, closures, deferreds and scheduling).
//! - [`host`]: file services installed as host operations.

#![forbid(unsafe_code)]

pub use ferry_abi as abi;
pub use ferry_bridge as bridge;
pub use ferry_host as host;
pub use ferry_mem as mem;

pub use ferry_bridge::{Boundary, BoundaryConfig, BridgeError, Handle, HostValue};
