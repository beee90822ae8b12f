//! Compute-module linear memory as seen from the host.
//!
//! - [`LinearMemory`]: flat, page-granular, growable byte buffer. Every growth gives the buffer a
//!   new [`BufferId`], mirroring how a `WebAssembly.Memory` detaches its old `ArrayBuffer`.
//! - [`ViewCache`]: lazily (re)built typed views over the buffer, one per element width.
//! - [`GuestAlloc`]: the compute module's exported allocator entry points, with
//!   [`FreeListAllocator`] as the native implementation used by tests and embedders.

#![forbid(unsafe_code)]

mod alloc;
mod error;
mod linear;
mod view;

pub use alloc::{AllocatorOptions, FreeListAllocator, GuestAlloc};
pub use error::{MemoryError, Result};
pub use linear::{BufferId, LinearMemory, LinearMemoryOptions};
pub use view::{Element, ElementKind, TypedView, TypedViewMut, ViewCache};
