//! Error kinds a caller of the mini allocator can reasonably inspect.
//!
//! Most invariant violations described by the mini allocator (bad batch
//! indices, a metadata entry already marked released when it should not
//! be, too many batches) are caller bugs, not runtime conditions, and
//! are reported with `assert!`/`panic!` instead of a `Result`. The two
//! exceptions below are things a well-behaved caller can hit in normal
//! operation, so they come back as `Err` instead.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiniAllocatorError {
    /// The extent allocator could not satisfy a request for a fresh
    /// extent. This can happen the first time `init`/`alloc` reserves a
    /// batch's slack extent, before any mini-allocator state has been
    /// mutated, so it is safe to propagate rather than assert.
    ExtentAllocatorExhausted,
    /// A caller-supplied key exceeded `MAX_INLINE_KEY_SIZE`.
    KeyTooLong { len: usize },
}

impl fmt::Display for MiniAllocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiniAllocatorError::ExtentAllocatorExhausted => {
                write!(f, "extent allocator is exhausted")
            }
            MiniAllocatorError::KeyTooLong { len } => {
                write!(
                    f,
                    "key of {} bytes exceeds MAX_INLINE_KEY_SIZE ({})",
                    len,
                    crate::entry::MAX_INLINE_KEY_SIZE
                )
            }
        }
    }
}

impl std::error::Error for MiniAllocatorError {}
