//! Boundary contract shared by the host side and the compute module.
//!
//! Everything here is plain data: integer handle/pointer newtypes, the layout of the return
//! slots the host writes into compute memory, and the sentinels both sides agree on. The crate
//! has no dependencies so the compute module can link it as well.

#![forbid(unsafe_code)]

mod handle;
pub mod layout;

pub use handle::{GuestFnIndex, Handle};

/// Byte address inside the compute module's linear memory.
///
/// Address 0 is never handed out by the allocator, so a zero pointer doubles as "no value" in
/// `(ptr, len)` return slots.
pub type GuestPtr = u32;

/// `ptr` value written to a `(ptr, len)` slot when an optional string/buffer is absent.
pub const PTR_NONE: GuestPtr = 0;
