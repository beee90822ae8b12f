//! Typed views over linear memory.
//!
//! Rebuilding a typed view is cheap but not free, so the cache keeps one key per element width
//! and only rebuilds a view when the buffer it was built over has been replaced (growth) or
//! changed length. The borrow on [`LinearMemory`] guarantees a view can never be used across a
//! growth; the cache key is what tells us when the next access needs a fresh one.

use core::mem::size_of;

use ferry_abi::GuestPtr;

use crate::linear::{BufferId, LinearMemory};
use crate::{MemoryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        ElementKind::I8,
        ElementKind::U8,
        ElementKind::I16,
        ElementKind::U16,
        ElementKind::I32,
        ElementKind::U32,
        ElementKind::F32,
    ];

    pub const fn size(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Scalar types a [`TypedView`] can be built over.
pub trait Element: bytemuck::Pod + sealed::Sealed {
    const KIND: ElementKind;
}

macro_rules! element {
    ($ty:ty, $kind:ident) => {
        impl sealed::Sealed for $ty {}
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;
        }
    };
}

element!(i8, I8);
element!(u8, U8);
element!(i16, I16);
element!(u16, U16);
element!(i32, I32);
element!(u32, U32);
element!(f32, F32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ViewKey {
    buffer: BufferId,
    byte_len: usize,
}

impl ViewKey {
    fn of(mem: &LinearMemory) -> Self {
        Self {
            buffer: mem.buffer_id(),
            byte_len: mem.byte_len(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ViewCache {
    keys: [Option<ViewKey>; ElementKind::ALL.len()],
    rebuilds: u64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view<'m, T: Element>(&mut self, mem: &'m LinearMemory) -> TypedView<'m, T> {
        let key = self.refresh(T::KIND, mem);
        TypedView {
            buffer: key.buffer,
            elems: bytemuck::cast_slice(mem.bytes()),
        }
    }

    pub fn view_mut<'m, T: Element>(&mut self, mem: &'m mut LinearMemory) -> TypedViewMut<'m, T> {
        let key = self.refresh(T::KIND, mem);
        TypedViewMut {
            buffer: key.buffer,
            elems: bytemuck::cast_slice_mut(mem.bytes_mut()),
        }
    }

    /// Whether the cached view for `kind` still matches `mem`.
    pub fn is_fresh(&self, kind: ElementKind, mem: &LinearMemory) -> bool {
        self.keys[kind.slot()] == Some(ViewKey::of(mem))
    }

    /// Drop every cached view; the next access of each width rebuilds.
    pub fn invalidate(&mut self) {
        self.keys = Default::default();
    }

    /// Number of views built so far (first builds included).
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn refresh(&mut self, kind: ElementKind, mem: &LinearMemory) -> ViewKey {
        let key = ViewKey::of(mem);
        let slot = &mut self.keys[kind.slot()];
        if *slot != Some(key) {
            tracing::trace!(
                ?kind,
                stale = ?slot.map(|k| k.buffer),
                fresh = ?key.buffer,
                "rebuilding memory view"
            );
            *slot = Some(key);
            self.rebuilds += 1;
        }
        key
    }
}

/// Read-only typed window over the whole of linear memory.
///
/// Pointers passed to [`TypedView::subarray`] are byte addresses and must be aligned to the
/// element size.
#[derive(Debug, Clone, Copy)]
pub struct TypedView<'m, T> {
    buffer: BufferId,
    elems: &'m [T],
}

impl<'m, T: Element> TypedView<'m, T> {
    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    /// Length in elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn as_slice(&self) -> &'m [T] {
        self.elems
    }

    /// `len` elements starting at byte address `ptr`.
    pub fn subarray(&self, ptr: GuestPtr, len: usize) -> Result<&'m [T]> {
        let range = element_range::<T>(ptr, len, self.elems.len())?;
        Ok(&self.elems[range])
    }
}

#[derive(Debug)]
pub struct TypedViewMut<'m, T> {
    buffer: BufferId,
    elems: &'m mut [T],
}

impl<'m, T: Element> TypedViewMut<'m, T> {
    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn subarray(&self, ptr: GuestPtr, len: usize) -> Result<&[T]> {
        let range = element_range::<T>(ptr, len, self.elems.len())?;
        Ok(&self.elems[range])
    }

    pub fn subarray_mut(&mut self, ptr: GuestPtr, len: usize) -> Result<&mut [T]> {
        let range = element_range::<T>(ptr, len, self.elems.len())?;
        Ok(&mut self.elems[range])
    }
}

fn element_range<T: Element>(
    ptr: GuestPtr,
    len: usize,
    total_elems: usize,
) -> Result<core::ops::Range<usize>> {
    let size = size_of::<T>();
    if ptr as usize % size != 0 {
        return Err(MemoryError::Misaligned { ptr, align: size });
    }

    let start = ptr as usize / size;
    match start.checked_add(len) {
        Some(end) if end <= total_elems => Ok(start..end),
        _ => Err(MemoryError::OutOfBounds {
            ptr: u64::from(ptr),
            len: len.saturating_mul(size),
            byte_len: total_elems * size,
        }),
    }
}
