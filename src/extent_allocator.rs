//! The coarse-grained extent allocator the mini allocator refills from:
//! an external collaborator that owns reference counting and
//! persistence of its own free map.
use crate::error::MiniAllocatorError;

pub trait ExtentAllocator: Send + Sync {
    /// Reserves a fresh extent and returns its base address.
    fn alloc_extent(&self) -> Result<u64, MiniAllocatorError>;

    /// Increments the refcount of the extent at `addr`.
    fn inc_refcount(&self, addr: u64);

    /// Returns the current refcount of the extent at `addr`.
    fn get_refcount(&self, addr: u64) -> u8;
}
