//! Moving strings, byte buffers and optional scalars across the boundary.
//!
//! Everything the host writes into compute memory is placed in a block obtained from the compute
//! module's allocator; ownership of that block passes to the compute side, which frees it with the
//! same `(len, align)` it was handed.

use core::mem::size_of;

use ferry_abi::layout::{flag, ret_slot};
use ferry_abi::{GuestPtr, PTR_NONE};
use ferry_mem::Element;

use crate::boundary::Boundary;
use crate::{BridgeError, Result};

impl Boundary {
    /// Copy `s` into freshly allocated compute memory as UTF-8, returning `(ptr, len)`.
    ///
    /// The block is first sized for an all-ASCII string (one byte per UTF-16 unit). At the first
    /// non-ASCII character it is reallocated to the worst case for the remainder (three bytes per
    /// unit), and shrunk to the exact length once the remainder is written. The empty string
    /// yields a non-null pointer and length 0.
    pub fn pass_string(&mut self, s: &str) -> Result<(GuestPtr, u32)> {
        let bytes = s.as_bytes();
        let units = utf16_len(s)?;
        let mut ptr = self.allocate(units, 1)?;

        let ascii = bytes.iter().take_while(|b| b.is_ascii()).count();
        self.view_mut::<u8>()
            .subarray_mut(ptr, ascii)?
            .copy_from_slice(&bytes[..ascii]);
        if ascii == bytes.len() {
            return Ok((ptr, ascii as u32));
        }

        let rest = &s[ascii..];
        let offset = ascii as u32;
        let capacity = offset + utf16_len(rest)?.saturating_mul(3);
        ptr = self.reallocate(ptr, units, capacity, 1)?;
        self.view_mut::<u8>()
            .subarray_mut(ptr + offset, rest.len())?
            .copy_from_slice(rest.as_bytes());

        let written = offset + rest.len() as u32;
        ptr = self.reallocate(ptr, capacity, written, 1)?;
        tracing::trace!(ptr, len = written, capacity, "passed non-ASCII string");
        Ok((ptr, written))
    }

    /// Decode `len` bytes at `ptr` as UTF-8. Invalid sequences are an error, never replaced.
    pub fn read_string(&mut self, ptr: GuestPtr, len: u32) -> Result<String> {
        let bytes = self.view::<u8>().subarray(ptr, len as usize)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(source) => Err(BridgeError::Decode { ptr, len, source }),
        }
    }

    pub fn pass_bytes(&mut self, data: &[u8]) -> Result<(GuestPtr, u32)> {
        self.pass_slice(data)
    }

    /// Copy a typed slice into compute memory, aligned to the element size.
    /// Returns `(ptr, len)` with `len` in elements.
    pub fn pass_slice<T: Element>(&mut self, data: &[T]) -> Result<(GuestPtr, u32)> {
        let len = u32::try_from(data.len()).map_err(|_| too_large(data.len()))?;
        let byte_len = len
            .checked_mul(size_of::<T>() as u32)
            .ok_or_else(|| too_large(data.len()))?;
        let ptr = self.allocate(byte_len, size_of::<T>() as u32)?;
        self.view_mut::<T>()
            .subarray_mut(ptr, data.len())?
            .copy_from_slice(data);
        Ok((ptr, len))
    }

    /// Zero-copy borrow of `len` bytes at `ptr`.
    pub fn bytes_view(&mut self, ptr: GuestPtr, len: u32) -> Result<&[u8]> {
        self.typed_slice::<u8>(ptr, len)
    }

    /// Zero-copy borrow of `len` elements at byte address `ptr`.
    pub fn typed_slice<T: Element>(&mut self, ptr: GuestPtr, len: u32) -> Result<&[T]> {
        Ok(self.view::<T>().subarray(ptr, len as usize)?)
    }

    /// Owned copy for values the host keeps past the current call.
    pub fn copy_bytes(&mut self, ptr: GuestPtr, len: u32) -> Result<Vec<u8>> {
        Ok(self.bytes_view(ptr, len)?.to_vec())
    }

    pub fn write_opt_u32(&mut self, ret: GuestPtr, value: Option<u32>) -> Result<()> {
        self.write_flag(ret, value.is_some())?;
        self.memory
            .write_u32(ret + ret_slot::U32_VALUE as u32, value.unwrap_or(0))?;
        Ok(())
    }

    pub fn read_opt_u32(&self, ret: GuestPtr) -> Result<Option<u32>> {
        if !self.read_flag(ret)? {
            return Ok(None);
        }
        Ok(Some(self.memory.read_u32(ret + ret_slot::U32_VALUE as u32)?))
    }

    pub fn write_opt_bool(&mut self, ret: GuestPtr, value: Option<bool>) -> Result<()> {
        self.write_opt_u32(ret, value.map(u32::from))
    }

    pub fn read_opt_bool(&self, ret: GuestPtr) -> Result<Option<bool>> {
        Ok(self.read_opt_u32(ret)?.map(|v| v != 0))
    }

    pub fn write_opt_f64(&mut self, ret: GuestPtr, value: Option<f64>) -> Result<()> {
        self.write_flag(ret, value.is_some())?;
        self.memory
            .write_f64(ret + ret_slot::F64_VALUE as u32, value.unwrap_or(0.0))?;
        Ok(())
    }

    pub fn read_opt_f64(&self, ret: GuestPtr) -> Result<Option<f64>> {
        if !self.read_flag(ret)? {
            return Ok(None);
        }
        Ok(Some(self.memory.read_f64(ret + ret_slot::F64_VALUE as u32)?))
    }

    /// Pass `value` (if any) and write its `(ptr, len)` to the slot; `ptr` is 0 when absent.
    pub fn write_opt_string(&mut self, ret: GuestPtr, value: Option<&str>) -> Result<()> {
        let (ptr, len) = match value {
            Some(s) => self.pass_string(s)?,
            None => (PTR_NONE, 0),
        };
        self.write_ptr_len(ret, ptr, len)
    }

    /// Read a `(ptr, len)` slot written by [`Boundary::write_opt_string`]. The block stays owned
    /// by the compute side.
    pub fn read_opt_string(&mut self, ret: GuestPtr) -> Result<Option<String>> {
        let (ptr, len) = self.read_ptr_len(ret)?;
        if ptr == PTR_NONE {
            return Ok(None);
        }
        self.read_string(ptr, len).map(Some)
    }

    pub(crate) fn write_ptr_len(&mut self, ret: GuestPtr, ptr: GuestPtr, len: u32) -> Result<()> {
        self.memory.write_u32(ret + ret_slot::PTR as u32, ptr)?;
        self.memory.write_u32(ret + ret_slot::LEN as u32, len)?;
        Ok(())
    }

    pub fn read_ptr_len(&self, ret: GuestPtr) -> Result<(GuestPtr, u32)> {
        Ok((
            self.memory.read_u32(ret + ret_slot::PTR as u32)?,
            self.memory.read_u32(ret + ret_slot::LEN as u32)?,
        ))
    }

    fn write_flag(&mut self, ret: GuestPtr, present: bool) -> Result<()> {
        let word = if present { flag::PRESENT } else { flag::ABSENT };
        self.memory.write_u32(ret + ret_slot::FLAG as u32, word)?;
        Ok(())
    }

    fn read_flag(&self, ret: GuestPtr) -> Result<bool> {
        Ok(self.memory.read_u32(ret + ret_slot::FLAG as u32)? != flag::ABSENT)
    }
}

fn utf16_len(s: &str) -> Result<u32> {
    let units = s.encode_utf16().count();
    u32::try_from(units).map_err(|_| too_large(units))
}

fn too_large(len: usize) -> BridgeError {
    BridgeError::Memory(ferry_mem::MemoryError::OutOfBounds {
        ptr: 0,
        len,
        byte_len: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundaryConfig;

    fn boundary() -> Boundary {
        Boundary::new(BoundaryConfig::default()).unwrap()
    }

    #[test]
    fn ascii_string_takes_the_fast_path() {
        let mut b = boundary();
        let (ptr, len) = b.pass_string("hello").unwrap();
        assert_eq!(len, 5);
        assert_ne!(ptr, 0);
        assert_eq!(b.read_string(ptr, len).unwrap(), "hello");
        b.free_guest(ptr, len, 1).unwrap();
    }

    #[test]
    fn non_ascii_string_is_shrunk_to_exact_length() {
        let mut b = boundary();
        let s = "héllo, wörld 🦀";
        let (ptr, len) = b.pass_string(s).unwrap();
        assert_eq!(len as usize, s.len());
        assert_eq!(b.read_string(ptr, len).unwrap(), s);
        // Exact length owned: freeing with the reported length must succeed.
        b.free_guest(ptr, len, 1).unwrap();
    }

    #[test]
    fn empty_string_has_non_null_pointer() {
        let mut b = boundary();
        let (ptr, len) = b.pass_string("").unwrap();
        assert_ne!(ptr, PTR_NONE);
        assert_eq!(len, 0);
        assert_eq!(b.read_string(ptr, 0).unwrap(), "");
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut b = boundary();
        let (ptr, len) = b.pass_bytes(&[0x66, 0xff, 0x6f]).unwrap();
        let err = b.read_string(ptr, len).unwrap_err();
        match err {
            BridgeError::Decode { ptr: at, len: n, source } => {
                assert_eq!((at, n), (ptr, 3));
                assert_eq!(source.valid_up_to(), 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn typed_slices_round_trip_aligned() {
        let mut b = boundary();
        b.pass_bytes(&[1]).unwrap();
        let samples = [0.25f32, -1.0, 0.5];
        let (ptr, len) = b.pass_slice(&samples).unwrap();
        assert_eq!(ptr % 4, 0);
        assert_eq!(b.typed_slice::<f32>(ptr, len).unwrap(), &samples);
        assert!(b.bytes_view(ptr, 12).is_ok());
    }

    #[test]
    fn copies_outlive_later_writes() {
        let mut b = boundary();
        let (ptr, len) = b.pass_bytes(b"abc").unwrap();
        let copy = b.copy_bytes(ptr, len).unwrap();
        b.memory_mut().write_bytes(ptr, b"xyz").unwrap();
        assert_eq!(copy, b"abc");
        assert_eq!(b.bytes_view(ptr, len).unwrap(), b"xyz");
    }

    #[test]
    fn optional_scalars_use_the_flag_word() {
        let mut b = boundary();
        let ret = b
            .allocate(ret_slot::BYTES as u32, ret_slot::ALIGN as u32)
            .unwrap();

        b.write_opt_f64(ret, Some(0.0)).unwrap();
        assert_eq!(b.read_opt_f64(ret).unwrap(), Some(0.0));
        b.write_opt_f64(ret, None).unwrap();
        assert_eq!(b.read_opt_f64(ret).unwrap(), None);

        // Every u32 is representable, including the all-ones pattern.
        b.write_opt_u32(ret, Some(u32::MAX)).unwrap();
        assert_eq!(b.read_opt_u32(ret).unwrap(), Some(u32::MAX));
        b.write_opt_bool(ret, Some(false)).unwrap();
        assert_eq!(b.read_opt_bool(ret).unwrap(), Some(false));
        b.write_opt_bool(ret, None).unwrap();
        assert_eq!(b.read_opt_bool(ret).unwrap(), None);
    }

    #[test]
    fn optional_strings_use_null_pointer() {
        let mut b = boundary();
        let ret = b
            .allocate(ret_slot::BYTES as u32, ret_slot::ALIGN as u32)
            .unwrap();
        b.write_opt_string(ret, None).unwrap();
        assert_eq!(b.read_ptr_len(ret).unwrap(), (PTR_NONE, 0));
        assert_eq!(b.read_opt_string(ret).unwrap(), None);

        b.write_opt_string(ret, Some("")).unwrap();
        assert_eq!(b.read_opt_string(ret).unwrap(), Some(String::new()));
    }
}
