//! Memory layout contract for values the host writes back into compute memory.
//!
//! Host intrinsics that produce more than one scalar (a string's pointer and length, an optional
//! number's presence flag and value) do not return them in registers. The compute side reserves a
//! [`ret_slot::BYTES`]-byte return slot, passes its address, and reads the fields back at the
//! offsets below. All fields are little-endian.
//!
//! Optional values use exactly one convention per kind:
//!
//! - optional scalars (`bool`, `u32`, `f64`): presence flag word at [`ret_slot::FLAG`], value at
//!   [`ret_slot::U32_VALUE`] or [`ret_slot::F64_VALUE`]
//! - optional strings/buffers: `(ptr, len)` pair with `ptr == PTR_NONE` when absent
//! - optional host values: [`crate::Handle::NONE`]
//!
//! No out-of-range scalar sentinels are used anywhere in the contract.

/// WebAssembly linear memory page size.
pub const PAGE_BYTES: usize = 64 * 1024;

/// Max pages addressable with 32-bit pointers (2^32 bytes).
pub const MAX_WASM32_PAGES: u32 = 65536;

/// Return slot field offsets (bytes from the slot base).
pub mod ret_slot {
    /// Presence flag of an optional scalar (`u32`, 0 or 1).
    pub const FLAG: usize = 0;
    /// Pointer half of a `(ptr, len)` pair.
    pub const PTR: usize = 0;
    /// Length half of a `(ptr, len)` pair.
    pub const LEN: usize = 4;
    /// Value of an optional 32-bit scalar.
    pub const U32_VALUE: usize = 4;
    /// Value of an optional `f64`; 8-byte aligned within the slot.
    pub const F64_VALUE: usize = 8;

    pub const BYTES: usize = 16;
    pub const ALIGN: usize = 8;
}

/// Values of the [`ret_slot::FLAG`] word.
pub mod flag {
    pub const ABSENT: u32 = 0;
    pub const PRESENT: u32 = 1;
}

/// Round `value` up to the next multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

/// Number of pages needed to hold `bytes` bytes.
pub const fn pages_for_bytes(bytes: usize) -> usize {
    align_up(bytes, PAGE_BYTES) / PAGE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_slot_fields_fit_and_are_aligned() {
        assert!(ret_slot::LEN + 4 <= ret_slot::BYTES);
        assert!(ret_slot::F64_VALUE + 8 <= ret_slot::BYTES);
        assert_eq!(ret_slot::F64_VALUE % 8, 0);
        assert_eq!(ret_slot::BYTES % ret_slot::ALIGN, 0);
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 4), 12);
    }

    #[test]
    fn pages_for_bytes_rounds_up() {
        assert_eq!(pages_for_bytes(0), 0);
        assert_eq!(pages_for_bytes(1), 1);
        assert_eq!(pages_for_bytes(PAGE_BYTES), 1);
        assert_eq!(pages_for_bytes(PAGE_BYTES + 1), 2);
    }
}
