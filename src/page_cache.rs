//! The page cache capability set the mini allocator is built on: fixed
//! size pages, reached through a four-step pin/claim/lock/unlock
//! protocol, plus extent-level dealloc/sync/prefetch.
//!
//! This is an external collaborator: production callers plug in their
//! own block-I/O-backed cache; this crate only depends on the trait
//! below, plus ships an in-memory [`crate::testing::TestPageCache`] for
//! its own test suite.
use crate::extent_allocator::ExtentAllocator;

/// Tags pages so the cache can dispatch typed dealloc/eviction behavior.
/// Opaque to the mini allocator: it stores exactly one `PageType` at
/// `init` time and passes it back on every call it makes into the
/// cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageType(pub u32);

/// A handle to a pinned page. Dropping a handle without unpinning it
/// through the owning [`PageCache`] is a caller bug; the trait does not
/// attempt to make that statically impossible; see [`crate::page_guard`]
/// for the RAII wrapper that does.
pub trait PageHandle: Send {
    /// The address this handle is pinning.
    fn addr(&self) -> u64;

    /// Returns the page's backing bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold the page's lock (via [`PageCache::lock`])
    /// for the duration of the returned borrow.
    unsafe fn data(&self) -> &[u8];

    /// Returns the page's backing bytes, mutably.
    ///
    /// # Safety
    ///
    /// The caller must hold the page's lock (via [`PageCache::lock`])
    /// for the duration of the returned borrow.
    unsafe fn data_mut(&self) -> &mut [u8];
}

pub trait PageCache: Send + Sync {
    type Handle: PageHandle;
    type ExtentAllocator: ExtentAllocator;

    /// Fixed size of every page in this cache, in bytes.
    fn page_size(&self) -> u64;

    /// Size of one extent, in bytes. Always a multiple of `page_size()`.
    fn extent_size(&self) -> u64;

    /// Creates a brand-new page at `addr`. The returned handle is
    /// already pinned, claimed, and locked: nothing else can have a
    /// reference to a page that did not exist a moment ago.
    fn alloc(&self, addr: u64, page_type: PageType) -> Self::Handle;

    /// Pins an existing page at `addr`. `blocking` mirrors the
    /// underlying cache's own knob for whether to wait on I/O; this
    /// crate always calls with `blocking = true`, since it has no
    /// cooperative task system to yield to.
    fn get(&self, addr: u64, blocking: bool, page_type: PageType) -> Option<Self::Handle>;

    /// Attempts to acquire upgrade intent on a pinned page.
    /// Non-blocking: `false` means some other thread holds it.
    fn claim(&self, handle: &Self::Handle) -> bool;

    /// Waits for readers to drain once a claim is held.
    fn lock(&self, handle: &Self::Handle);

    fn unlock(&self, handle: &Self::Handle);
    fn unclaim(&self, handle: &Self::Handle);
    fn unget(&self, handle: Self::Handle);

    fn mark_dirty(&self, handle: &Self::Handle);

    /// Deallocates the extent at `base_addr`. Returns `true` iff the
    /// extent's refcount reached zero as a result.
    fn dealloc(&self, base_addr: u64, page_type: PageType) -> bool;

    /// Flushes an extent; `*pages_outstanding` is incremented by the
    /// number of pages still dirty after the flush.
    fn extent_sync(&self, base_addr: u64, pages_outstanding: &mut u64);

    fn prefetch(&self, base_addr: u64, page_type: PageType);

    /// Returns the extent allocator backing this cache.
    fn allocator(&self) -> &Self::ExtentAllocator;
}
