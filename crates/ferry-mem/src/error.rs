use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors raised while touching linear memory or the compute-side allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("out of bounds: ptr={ptr:#x} len={len} byte_len={byte_len}")]
    OutOfBounds {
        ptr: u64,
        len: usize,
        byte_len: usize,
    },

    #[error("misaligned access: ptr={ptr:#x} requires alignment {align}")]
    Misaligned { ptr: u32, align: usize },

    #[error("memory growth limit: requested {requested_pages} pages (max {max_pages})")]
    GrowthLimit { requested_pages: u64, max_pages: u32 },

    #[error("invalid alignment {0} (expected a power of two)")]
    InvalidAlign(u32),

    #[error("free of unknown allocation: ptr={ptr:#x} len={len}")]
    InvalidFree { ptr: u32, len: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
