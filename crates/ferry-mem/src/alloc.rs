//! Compute-side allocator entry points.
//!
//! The marshaler never picks addresses itself: strings and buffers headed into compute memory are
//! placed through the module's own `allocate`/`reallocate`/`free` exports. [`GuestAlloc`] is that
//! contract; [`FreeListAllocator`] is a native implementation that manages a [`LinearMemory`]
//! directly and grows it on exhaustion (which is exactly what invalidates cached views).

use std::collections::BTreeMap;

use ferry_abi::layout::{align_up, pages_for_bytes};
use ferry_abi::GuestPtr;
use serde::Deserialize;

use crate::{LinearMemory, MemoryError, Result};

/// Allocator exported by the compute module.
///
/// All sizes are in bytes and `align` must be a power of two. Implementations never return
/// address 0, including for zero-length requests.
pub trait GuestAlloc {
    fn allocate(&mut self, mem: &mut LinearMemory, len: u32, align: u32) -> Result<GuestPtr>;

    /// Resize an allocation, preserving the first `min(old_len, new_len)` bytes.
    fn reallocate(
        &mut self,
        mem: &mut LinearMemory,
        ptr: GuestPtr,
        old_len: u32,
        new_len: u32,
        align: u32,
    ) -> Result<GuestPtr>;

    fn free(&mut self, mem: &mut LinearMemory, ptr: GuestPtr, len: u32, align: u32)
        -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocatorOptions {
    /// Bytes at the bottom of memory that are never handed out. Must be non-zero so address 0 can
    /// mean "no pointer".
    pub reserved_bytes: u32,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self { reserved_bytes: 8 }
    }
}

/// First-fit free-list allocator with a bump region at the top.
///
/// Free blocks are kept coalesced; a block that ends at the bump pointer is folded back into the
/// bump region. Growing the allocation that sits at the top extends it in place, which is the
/// common case for the marshaler's encode-then-shrink string path.
#[derive(Debug)]
pub struct FreeListAllocator {
    top: u32,
    /// start -> len
    free: BTreeMap<u32, u32>,
    /// start -> len
    live: BTreeMap<u32, u32>,
}

impl Default for FreeListAllocator {
    fn default() -> Self {
        Self {
            top: AllocatorOptions::default().reserved_bytes,
            free: BTreeMap::new(),
            live: BTreeMap::new(),
        }
    }
}

impl FreeListAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: AllocatorOptions) -> Result<Self> {
        if options.reserved_bytes == 0 {
            return Err(MemoryError::InvalidConfig("reserved_bytes must be non-zero"));
        }
        Ok(Self {
            top: options.reserved_bytes,
            ..Self::default()
        })
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|len| u64::from(*len)).sum()
    }

    /// First byte never handed out by the bump region.
    pub fn top(&self) -> u32 {
        self.top
    }

    fn take_free_fit(&mut self, len: u32, align: u32) -> Option<GuestPtr> {
        let (start, block_len, ptr) = self.free.iter().find_map(|(&start, &block_len)| {
            let ptr = align_up(start as usize, align as usize) as u64;
            let end = ptr + u64::from(len);
            (end <= u64::from(start) + u64::from(block_len)).then_some((start, block_len, ptr as u32))
        })?;

        self.free.remove(&start);
        if ptr > start {
            self.free.insert(start, ptr - start);
        }
        let end = ptr + len;
        let block_end = start + block_len;
        if end < block_end {
            self.free.insert(end, block_end - end);
        }
        Some(ptr)
    }

    fn bump(&mut self, mem: &mut LinearMemory, len: u32, align: u32) -> Result<GuestPtr> {
        let ptr = align_up(self.top as usize, align as usize) as u64;
        let end = ptr + u64::from(len);
        ensure_capacity(mem, end)?;

        let ptr = ptr as u32;
        if ptr > self.top {
            let pad_start = self.top;
            self.free.insert(pad_start, ptr - pad_start);
        }
        self.top = end as u32;
        Ok(ptr)
    }

    /// Return `[start, start + len)` to the free pool, coalescing with neighbours.
    fn release_range(&mut self, mut start: u32, mut len: u32) {
        if len == 0 {
            return;
        }

        if let Some((&prev_start, &prev_len)) = self.free.range(..start).next_back() {
            if prev_start + prev_len == start {
                self.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
        }

        if start + len == self.top {
            self.top = start;
        } else {
            self.free.insert(start, len);
        }
    }

    fn live_len(&self, ptr: GuestPtr, len: u32) -> Result<()> {
        match self.live.get(&ptr) {
            Some(&live) if live == len => Ok(()),
            _ => Err(MemoryError::InvalidFree { ptr, len }),
        }
    }
}

impl GuestAlloc for FreeListAllocator {
    fn allocate(&mut self, mem: &mut LinearMemory, len: u32, align: u32) -> Result<GuestPtr> {
        check_align(align)?;
        if len == 0 {
            return Ok(dangling(align));
        }

        let ptr = match self.take_free_fit(len, align) {
            Some(ptr) => ptr,
            None => self.bump(mem, len, align)?,
        };
        self.live.insert(ptr, len);
        tracing::trace!(ptr, len, align, "guest allocate");
        Ok(ptr)
    }

    fn reallocate(
        &mut self,
        mem: &mut LinearMemory,
        ptr: GuestPtr,
        old_len: u32,
        new_len: u32,
        align: u32,
    ) -> Result<GuestPtr> {
        check_align(align)?;
        if old_len == 0 {
            return self.allocate(mem, new_len, align);
        }
        self.live_len(ptr, old_len)?;
        if new_len == 0 {
            self.free(mem, ptr, old_len, align)?;
            return Ok(dangling(align));
        }

        if new_len <= old_len {
            self.live.insert(ptr, new_len);
            self.release_range(ptr + new_len, old_len - new_len);
            tracing::trace!(ptr, old_len, new_len, "guest shrink in place");
            return Ok(ptr);
        }

        let old_end = ptr + old_len;
        let extra = new_len - old_len;
        if old_end == self.top {
            let end = u64::from(ptr) + u64::from(new_len);
            ensure_capacity(mem, end)?;
            self.top = end as u32;
            self.live.insert(ptr, new_len);
            tracing::trace!(ptr, old_len, new_len, "guest grow at top");
            return Ok(ptr);
        }
        if let Some(&next_len) = self.free.get(&old_end) {
            if next_len >= extra {
                self.free.remove(&old_end);
                if next_len > extra {
                    self.free.insert(old_end + extra, next_len - extra);
                }
                self.live.insert(ptr, new_len);
                tracing::trace!(ptr, old_len, new_len, "guest grow into free neighbour");
                return Ok(ptr);
            }
        }

        let new_ptr = self.allocate(mem, new_len, align)?;
        let src = ptr as usize..old_end as usize;
        mem.bytes_mut().copy_within(src, new_ptr as usize);
        self.free(mem, ptr, old_len, align)?;
        tracing::trace!(ptr, new_ptr, old_len, new_len, "guest reallocate moved");
        Ok(new_ptr)
    }

    fn free(
        &mut self,
        _mem: &mut LinearMemory,
        ptr: GuestPtr,
        len: u32,
        align: u32,
    ) -> Result<()> {
        check_align(align)?;
        if len == 0 {
            return Ok(());
        }
        self.live_len(ptr, len)?;
        self.live.remove(&ptr);
        self.release_range(ptr, len);
        tracing::trace!(ptr, len, "guest free");
        Ok(())
    }
}

fn check_align(align: u32) -> Result<()> {
    if align.is_power_of_two() {
        Ok(())
    } else {
        Err(MemoryError::InvalidAlign(align))
    }
}

/// Non-null address used for zero-length allocations; never read or written.
fn dangling(align: u32) -> GuestPtr {
    align
}

fn ensure_capacity(mem: &mut LinearMemory, end: u64) -> Result<()> {
    if end <= mem.byte_len() as u64 {
        return Ok(());
    }
    if end > u64::from(u32::MAX) {
        return Err(MemoryError::GrowthLimit {
            requested_pages: pages_for_bytes(end as usize) as u64,
            max_pages: mem.max_pages(),
        });
    }
    let needed = pages_for_bytes(end as usize) - mem.pages() as usize;
    mem.grow(needed as u32)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_abi::layout::PAGE_BYTES;

    fn setup() -> (LinearMemory, FreeListAllocator) {
        (LinearMemory::new(1).unwrap(), FreeListAllocator::new())
    }

    #[test]
    fn never_returns_null() {
        let (mut mem, mut alloc) = setup();
        assert_ne!(alloc.allocate(&mut mem, 0, 1).unwrap(), 0);
        assert_ne!(alloc.allocate(&mut mem, 1, 1).unwrap(), 0);
        assert_eq!(alloc.live_allocations(), 1);
    }

    #[test]
    fn respects_alignment() {
        let (mut mem, mut alloc) = setup();
        alloc.allocate(&mut mem, 3, 1).unwrap();
        let p = alloc.allocate(&mut mem, 8, 8).unwrap();
        assert_eq!(p % 8, 0);
        assert_eq!(
            alloc.allocate(&mut mem, 8, 3),
            Err(MemoryError::InvalidAlign(3))
        );
    }

    #[test]
    fn freed_blocks_are_reused() {
        let (mut mem, mut alloc) = setup();
        let a = alloc.allocate(&mut mem, 32, 1).unwrap();
        let _b = alloc.allocate(&mut mem, 32, 1).unwrap();
        alloc.free(&mut mem, a, 32, 1).unwrap();
        assert_eq!(alloc.allocate(&mut mem, 16, 1).unwrap(), a);
    }

    #[test]
    fn freeing_top_block_rewinds_bump_pointer() {
        let (mut mem, mut alloc) = setup();
        let start = alloc.top();
        let a = alloc.allocate(&mut mem, 10, 1).unwrap();
        let b = alloc.allocate(&mut mem, 10, 1).unwrap();
        alloc.free(&mut mem, a, 10, 1).unwrap();
        alloc.free(&mut mem, b, 10, 1).unwrap();
        assert_eq!(alloc.top(), start);
        assert_eq!(alloc.live_bytes(), 0);
    }

    #[test]
    fn double_free_is_rejected() {
        let (mut mem, mut alloc) = setup();
        let a = alloc.allocate(&mut mem, 4, 1).unwrap();
        alloc.free(&mut mem, a, 4, 1).unwrap();
        assert_eq!(
            alloc.free(&mut mem, a, 4, 1),
            Err(MemoryError::InvalidFree { ptr: a, len: 4 })
        );
    }

    #[test]
    fn exhaustion_grows_memory() {
        let (mut mem, mut alloc) = setup();
        let before = mem.buffer_id();
        let p = alloc.allocate(&mut mem, PAGE_BYTES as u32, 1).unwrap();
        assert_eq!(mem.pages(), 2);
        assert_ne!(mem.buffer_id(), before);
        assert!(mem.check_range(p, PAGE_BYTES).is_ok());
    }

    #[test]
    fn reallocate_at_top_extends_in_place() {
        let (mut mem, mut alloc) = setup();
        let p = alloc.allocate(&mut mem, 4, 1).unwrap();
        mem.write_bytes(p, b"abcd").unwrap();
        assert_eq!(alloc.reallocate(&mut mem, p, 4, 12, 1).unwrap(), p);
        assert_eq!(mem.read_bytes(p, 4).unwrap(), b"abcd");
        assert_eq!(alloc.reallocate(&mut mem, p, 12, 6, 1).unwrap(), p);
        assert_eq!(alloc.top(), p + 6);
    }

    #[test]
    fn reallocate_moves_when_blocked() {
        let (mut mem, mut alloc) = setup();
        let p = alloc.allocate(&mut mem, 4, 1).unwrap();
        mem.write_bytes(p, b"wxyz").unwrap();
        let _blocker = alloc.allocate(&mut mem, 4, 1).unwrap();

        let q = alloc.reallocate(&mut mem, p, 4, 64, 1).unwrap();
        assert_ne!(q, p);
        assert_eq!(mem.read_bytes(q, 4).unwrap(), b"wxyz");
        assert_eq!(alloc.live_allocations(), 2);
    }

    #[test]
    fn zero_reserved_bytes_is_rejected() {
        let err = FreeListAllocator::with_options(AllocatorOptions { reserved_bytes: 0 })
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }
}
