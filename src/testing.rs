//! In-process fakes for the page cache and extent allocator
//! collaborators, used exclusively by this crate's own test suite
//! (and, since they are `pub`, available to a dependent crate's
//! integration tests too) in place of a real `mmap`-backed cache.
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MiniAllocatorError;
use crate::extent_allocator::ExtentAllocator;
use crate::page_cache::{PageCache, PageHandle, PageType};

pub use crate::data_config::BytesDataConfig;

/// Extent allocator fake: hands out ever-increasing extent bases and
/// tracks refcounts in a plain `HashMap`.
pub struct TestExtentAllocator {
    extent_size: u64,
    next_addr: AtomicU64,
    refcounts: Mutex<HashMap<u64, u8>>,
}

impl TestExtentAllocator {
    pub fn new(extent_size: u64) -> Self {
        TestExtentAllocator {
            extent_size,
            // Reserve address 0: it collides with `next_addr[b] == 0`'s
            // "not yet initialized" sentinel and with `next_meta_addr
            // == 0`'s "no next page" sentinel.
            next_addr: AtomicU64::new(extent_size),
            refcounts: Mutex::new(HashMap::new()),
        }
    }

    fn dec_refcount(&self, addr: u64) -> bool {
        let mut refcounts = self.refcounts.lock().unwrap();
        let rc = refcounts
            .get_mut(&addr)
            .unwrap_or_else(|| panic!("dec_refcount of never-allocated extent {:#x}", addr));
        assert!(*rc > 0, "dec_refcount of already-zero extent {:#x}", addr);
        *rc -= 1;
        *rc == 0
    }
}

impl ExtentAllocator for TestExtentAllocator {
    fn alloc_extent(&self) -> Result<u64, MiniAllocatorError> {
        let addr = self.next_addr.fetch_add(self.extent_size, Ordering::SeqCst);
        self.refcounts.lock().unwrap().insert(addr, 1);
        Ok(addr)
    }

    fn inc_refcount(&self, addr: u64) {
        *self
            .refcounts
            .lock()
            .unwrap()
            .get_mut(&addr)
            .unwrap_or_else(|| panic!("inc_refcount of never-allocated extent {:#x}", addr)) += 1;
    }

    fn get_refcount(&self, addr: u64) -> u8 {
        *self.refcounts.lock().unwrap().get(&addr).unwrap_or(&0)
    }
}

struct PageState {
    data: UnsafeCell<Vec<u8>>,
    claimed: AtomicBool,
    locked: AtomicBool,
    dirty: AtomicBool,
}

// SAFETY: `data` is only read/written while the handle's owner holds
// the `locked` flag, per the `PageHandle::data`/`data_mut` contract.
unsafe impl Sync for PageState {}

impl PageState {
    fn new(size: usize) -> Self {
        PageState {
            data: UnsafeCell::new(vec![0u8; size]),
            claimed: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }
}

/// Page handle fake: an `Arc`-shared, atomically-guarded byte buffer.
pub struct TestPageHandle {
    addr: u64,
    state: Arc<PageState>,
}

impl PageHandle for TestPageHandle {
    fn addr(&self) -> u64 {
        self.addr
    }

    unsafe fn data(&self) -> &[u8] {
        &*self.state.data.get()
    }

    unsafe fn data_mut(&self) -> &mut [u8] {
        &mut *self.state.data.get()
    }
}

/// Page cache fake: an in-memory map from page address to backing
/// bytes, with claim/lock implemented as atomic flags rather than an
/// actual reader/writer protocol (this crate's own access pattern
/// never holds a read-only pin across a claim, so that distinction
/// doesn't need modeling here).
pub struct TestPageCache {
    page_size: u64,
    extent_size: u64,
    allocator: TestExtentAllocator,
    pages: Mutex<HashMap<u64, Arc<PageState>>>,
}

impl TestPageCache {
    pub fn new(page_size: u64, extent_size: u64) -> Self {
        assert!(extent_size % page_size == 0, "extent_size must be a multiple of page_size");
        TestPageCache {
            page_size,
            extent_size,
            allocator: TestExtentAllocator::new(extent_size),
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn entry_for(&self, addr: u64) -> Arc<PageState> {
        let mut pages = self.pages.lock().unwrap();
        Arc::clone(
            pages
                .entry(addr)
                .or_insert_with(|| Arc::new(PageState::new(self.page_size as usize))),
        )
    }
}

impl PageCache for TestPageCache {
    type Handle = TestPageHandle;
    type ExtentAllocator = TestExtentAllocator;

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn extent_size(&self) -> u64 {
        self.extent_size
    }

    fn alloc(&self, addr: u64, _page_type: PageType) -> TestPageHandle {
        let state = Arc::new(PageState::new(self.page_size as usize));
        state.claimed.store(true, Ordering::SeqCst);
        state.locked.store(true, Ordering::SeqCst);
        self.pages.lock().unwrap().insert(addr, Arc::clone(&state));
        TestPageHandle { addr, state }
    }

    fn get(&self, addr: u64, _blocking: bool, _page_type: PageType) -> Option<TestPageHandle> {
        Some(TestPageHandle {
            addr,
            state: self.entry_for(addr),
        })
    }

    fn claim(&self, handle: &TestPageHandle) -> bool {
        handle
            .state
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn lock(&self, handle: &TestPageHandle) {
        while handle
            .state
            .locked
            .compare_exchange_weak(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            std::thread::yield_now();
        }
    }

    fn unlock(&self, handle: &TestPageHandle) {
        handle.state.locked.store(false, Ordering::SeqCst);
    }

    fn unclaim(&self, handle: &TestPageHandle) {
        handle.state.claimed.store(false, Ordering::SeqCst);
    }

    fn unget(&self, _handle: TestPageHandle) {}

    fn mark_dirty(&self, handle: &TestPageHandle) {
        handle.state.dirty.store(true, Ordering::SeqCst);
    }

    fn dealloc(&self, base_addr: u64, _page_type: PageType) -> bool {
        let hit_zero = self.allocator.dec_refcount(base_addr);
        if hit_zero {
            let mut pages = self.pages.lock().unwrap();
            let pages_per_extent = self.extent_size / self.page_size;
            for i in 0..pages_per_extent {
                pages.remove(&(base_addr + i * self.page_size));
            }
        }
        hit_zero
    }

    fn extent_sync(&self, base_addr: u64, pages_outstanding: &mut u64) {
        // This fake flushes synchronously, so no page is ever left
        // dirty after the loop below; `pages_outstanding` stays
        // untouched on the happy path and only exists to match the
        // trait's signature for real, async-flushing implementations.
        let pages = self.pages.lock().unwrap();
        let pages_per_extent = self.extent_size / self.page_size;
        for i in 0..pages_per_extent {
            if let Some(state) = pages.get(&(base_addr + i * self.page_size)) {
                state.dirty.store(false, Ordering::SeqCst);
            }
        }
        let _ = pages_outstanding;
    }

    fn prefetch(&self, _base_addr: u64, _page_type: PageType) {}

    fn allocator(&self) -> &TestExtentAllocator {
        &self.allocator
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_then_get_sees_the_same_bytes() {
        let cache = TestPageCache::new(64, 256);
        let mut handle = cache.alloc(256, PageType(0));
        unsafe { handle.data_mut()[0] = 0x42 };
        cache.mark_dirty(&handle);
        cache.unlock(&handle);
        cache.unclaim(&handle);
        cache.unget(handle);

        let fetched = cache.get(256, true, PageType(0)).unwrap();
        assert!(cache.claim(&fetched));
        cache.lock(&fetched);
        assert_eq!(unsafe { fetched.data() }[0], 0x42);
    }

    #[test]
    fn dealloc_reports_refcount_reaching_zero() {
        let cache = TestPageCache::new(64, 256);
        let extent = cache.allocator().alloc_extent().unwrap();
        cache.allocator().inc_refcount(extent);
        assert!(!cache.dealloc(extent, PageType(0)));
        assert!(cache.dealloc(extent, PageType(0)));
    }

    #[test]
    fn claim_fails_while_already_claimed() {
        let cache = TestPageCache::new(64, 256);
        let a = cache.get(256, true, PageType(0)).unwrap();
        let b = cache.get(256, true, PageType(0)).unwrap();
        assert!(cache.claim(&a));
        assert!(!cache.claim(&b));
        cache.unclaim(&a);
        assert!(cache.claim(&b));
    }
}
