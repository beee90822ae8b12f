//! Primitive host-value queries every binding layer needs.
//!
//! Results with more than one scalar are written to a return slot at `ret` (see
//! [`ferry_abi::layout`]) instead of being returned.

use ferry_abi::{GuestPtr, Handle, PTR_NONE};

use crate::boundary::Boundary;
use crate::value::{HostValue, ValueKind};
use crate::{BridgeError, Result};

impl Boundary {
    /// Write `(ptr, len)` of the string value at `handle`, or a null pointer if it is not a
    /// string.
    pub fn string_get(&mut self, ret: GuestPtr, handle: Handle) -> Result<()> {
        match self.handles.get(handle)?.as_str().map(str::to_owned) {
            Some(s) => {
                let (ptr, len) = self.pass_string(&s)?;
                self.write_ptr_len(ret, ptr, len)
            }
            None => self.write_ptr_len(ret, PTR_NONE, 0),
        }
    }

    pub fn number_get(&mut self, ret: GuestPtr, handle: Handle) -> Result<()> {
        let value = self.handles.get(handle)?.as_f64();
        self.write_opt_f64(ret, value)
    }

    pub fn boolean_get(&mut self, ret: GuestPtr, handle: Handle) -> Result<()> {
        let value = self.handles.get(handle)?.as_bool();
        self.write_opt_bool(ret, value)
    }

    pub fn is_undefined(&self, handle: Handle) -> Result<bool> {
        Ok(matches!(self.handles.get(handle)?, HostValue::Undefined))
    }

    pub fn is_null(&self, handle: Handle) -> Result<bool> {
        Ok(matches!(self.handles.get(handle)?, HostValue::Null))
    }

    pub fn is_function(&self, handle: Handle) -> Result<bool> {
        Ok(self.handles.get(handle)?.is_function())
    }

    /// Write a human-readable rendering of the value as a passed string.
    pub fn debug_string(&mut self, ret: GuestPtr, handle: Handle) -> Result<()> {
        let rendered = self.handles.get(handle)?.to_string();
        let (ptr, len) = self.pass_string(&rendered)?;
        self.write_ptr_len(ret, ptr, len)
    }

    pub fn string_new(&mut self, ptr: GuestPtr, len: u32) -> Result<Handle> {
        let s = self.read_string(ptr, len)?;
        Ok(self.handles.alloc(HostValue::String(s)))
    }

    pub fn number_new(&mut self, value: f64) -> Handle {
        self.handles.alloc(HostValue::Number(value))
    }

    /// Handle to an owned copy of `len` bytes at `ptr`.
    pub fn bytes_new(&mut self, ptr: GuestPtr, len: u32) -> Result<Handle> {
        let bytes = self.copy_bytes(ptr, len)?;
        Ok(self.handles.alloc(HostValue::Bytes(bytes)))
    }

    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle> {
        self.handles.clone_ref(handle)
    }

    pub fn drop_ref(&mut self, handle: Handle) -> Result<()> {
        self.handles.release(handle)
    }

    /// The compute side aborting with a message. Returns the error to propagate; a message that
    /// does not decode is reported as the decode error instead.
    pub fn throw(&mut self, ptr: GuestPtr, len: u32) -> BridgeError {
        match self.read_string(ptr, len) {
            Ok(message) => BridgeError::Thrown(message),
            Err(err) => err,
        }
    }

    /// The string value at `handle`.
    pub fn expect_string(&self, handle: Handle) -> Result<&str> {
        let value = self.handles.get(handle)?;
        value.as_str().ok_or(BridgeError::TypeMismatch {
            expected: ValueKind::String,
            found: value.kind(),
        })
    }
}
