use core::ops::Range;

use ferry_abi::layout::{MAX_WASM32_PAGES, PAGE_BYTES};
use ferry_abi::GuestPtr;
use serde::Deserialize;

use crate::{MemoryError, Result};

/// Identity of the buffer currently backing a [`LinearMemory`].
///
/// A new id is minted every time the memory grows. Anything derived from the old buffer (cached
/// views, raw offsets into a host-side copy) must be rebuilt once the id changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub const fn generation(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinearMemoryOptions {
    /// Pages mapped when the memory is created.
    pub initial_pages: u32,
    /// Upper bound for [`LinearMemory::grow`]; at most [`MAX_WASM32_PAGES`].
    pub max_pages: u32,
}

impl Default for LinearMemoryOptions {
    fn default() -> Self {
        Self {
            initial_pages: 1,
            // 1 GiB.
            max_pages: 16384,
        }
    }
}

/// Flat, page-granular byte memory owned by the compute module.
///
/// Storage is kept as `u64` words so the base address is 8-byte aligned; this is what lets
/// [`crate::ViewCache`] hand out `&[u16]`/`&[f32]` views without copying.
///
/// Multi-byte accessors on this type (`read_u32`, `write_f64`, ...) are explicitly
/// little-endian, matching a JS `DataView` with `littleEndian = true`.
#[derive(Debug)]
pub struct LinearMemory {
    words: Vec<u64>,
    pages: u32,
    max_pages: u32,
    buffer: BufferId,
}

impl LinearMemory {
    pub fn new(initial_pages: u32) -> Result<Self> {
        Self::with_options(LinearMemoryOptions {
            initial_pages,
            ..LinearMemoryOptions::default()
        })
    }

    pub fn with_options(options: LinearMemoryOptions) -> Result<Self> {
        if options.max_pages > MAX_WASM32_PAGES {
            return Err(MemoryError::InvalidConfig(
                "max_pages exceeds the 32-bit address space",
            ));
        }
        if options.initial_pages > options.max_pages {
            return Err(MemoryError::GrowthLimit {
                requested_pages: u64::from(options.initial_pages),
                max_pages: options.max_pages,
            });
        }

        Ok(Self {
            words: vec![0u64; words_for_pages(options.initial_pages)],
            pages: options.initial_pages,
            max_pages: options.max_pages,
            buffer: BufferId(0),
        })
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn byte_len(&self) -> usize {
        self.pages as usize * PAGE_BYTES
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    /// Grow by `delta_pages`, returning the previous page count (`memory.grow` semantics).
    ///
    /// New pages are zeroed. A zero delta leaves the buffer (and its id) untouched.
    pub fn grow(&mut self, delta_pages: u32) -> Result<u32> {
        let old_pages = self.pages;
        let requested = u64::from(old_pages) + u64::from(delta_pages);
        if requested > u64::from(self.max_pages) {
            return Err(MemoryError::GrowthLimit {
                requested_pages: requested,
                max_pages: self.max_pages,
            });
        }
        if delta_pages == 0 {
            return Ok(old_pages);
        }

        let new_pages = requested as u32;
        self.words.resize(words_for_pages(new_pages), 0);
        self.pages = new_pages;
        self.buffer = BufferId(self.buffer.0 + 1);
        tracing::debug!(
            old_pages,
            new_pages,
            generation = self.buffer.0,
            "linear memory grown"
        );
        Ok(old_pages)
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Validate `[ptr, ptr + len)` and return it as a byte range.
    pub fn check_range(&self, ptr: GuestPtr, len: usize) -> Result<Range<usize>> {
        let start = ptr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.byte_len() => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds {
                ptr: u64::from(ptr),
                len,
                byte_len: self.byte_len(),
            }),
        }
    }

    pub fn read_bytes(&self, ptr: GuestPtr, len: usize) -> Result<&[u8]> {
        let range = self.check_range(ptr, len)?;
        Ok(&self.bytes()[range])
    }

    pub fn read_bytes_mut(&mut self, ptr: GuestPtr, len: usize) -> Result<&mut [u8]> {
        let range = self.check_range(ptr, len)?;
        Ok(&mut self.bytes_mut()[range])
    }

    pub fn write_bytes(&mut self, ptr: GuestPtr, data: &[u8]) -> Result<()> {
        self.read_bytes_mut(ptr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn read_u8(&self, ptr: GuestPtr) -> Result<u8> {
        Ok(self.read_bytes(ptr, 1)?[0])
    }

    pub fn write_u8(&mut self, ptr: GuestPtr, value: u8) -> Result<()> {
        self.write_bytes(ptr, &[value])
    }

    pub fn read_u32(&self, ptr: GuestPtr) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array(ptr)?))
    }

    pub fn write_u32(&mut self, ptr: GuestPtr, value: u32) -> Result<()> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    pub fn read_i32(&self, ptr: GuestPtr) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array(ptr)?))
    }

    pub fn write_i32(&mut self, ptr: GuestPtr, value: i32) -> Result<()> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    pub fn read_f64(&self, ptr: GuestPtr) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array(ptr)?))
    }

    pub fn write_f64(&mut self, ptr: GuestPtr, value: f64) -> Result<()> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    fn read_array<const N: usize>(&self, ptr: GuestPtr) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(ptr, N)?);
        Ok(out)
    }
}

fn words_for_pages(pages: u32) -> usize {
    pages as usize * (PAGE_BYTES / core::mem::size_of::<u64>())
}
