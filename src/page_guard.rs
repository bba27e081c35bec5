//! RAII wrapper around the page cache's pin → claim → lock protocol,
//! so that every exit path — success, refill, cross-page backfill, an
//! early `return`, a panic unwinding through `?` — runs
//! unlock/unclaim/unpin exactly once, in reverse order. Dropping the
//! wrapper is the only sanctioned way to give the page back.
use crate::cursor::Backoff;
use crate::page_cache::{PageCache, PageHandle, PageType};

/// A page that is pinned, claimed, and locked. Dereferencing its data
/// requires holding this guard, matching the `unsafe fn data`/`data_mut`
/// contract on [`PageHandle`].
pub(crate) struct LockedPage<'c, C: PageCache> {
    cache: &'c C,
    handle: Option<C::Handle>,
}

impl<'c, C: PageCache> LockedPage<'c, C> {
    /// Pins, claims, and locks the page at `addr`, retrying the
    /// claim step with bounded backoff: pin, and if claim fails,
    /// unpin and retry rather than spin while holding the pin.
    pub(crate) fn acquire(cache: &'c C, addr: u64, page_type: PageType) -> Self {
        let mut backoff = Backoff::new();
        loop {
            let handle = cache
                .get(addr, true, page_type)
                .unwrap_or_else(|| panic!("page at {:#x} must exist", addr));

            if cache.claim(&handle) {
                cache.lock(&handle);
                return LockedPage {
                    cache,
                    handle: Some(handle),
                };
            }

            cache.unget(handle);
            backoff.spin();
        }
    }

    /// Wraps a handle that `PageCache::alloc` already returned
    /// pinned, claimed, and locked.
    pub(crate) fn from_new(cache: &'c C, handle: C::Handle) -> Self {
        LockedPage {
            cache,
            handle: Some(handle),
        }
    }

    pub(crate) fn addr(&self) -> u64 {
        self.handle.as_ref().unwrap().addr()
    }

    pub(crate) fn data(&self) -> &[u8] {
        unsafe { self.handle.as_ref().unwrap().data() }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        unsafe { self.handle.as_ref().unwrap().data_mut() }
    }

    pub(crate) fn mark_dirty(&self) {
        self.cache.mark_dirty(self.handle.as_ref().unwrap());
    }
}

impl<'c, C: PageCache> Drop for LockedPage<'c, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cache.unlock(&handle);
            self.cache.unclaim(&handle);
            self.cache.unget(handle);
        }
    }
}
