//! Quick-path operations: pinning the metadata chain's root without
//! walking it, for callers that only want to keep a mini allocator
//! structurally alive.
use crate::page_cache::{PageCache, PageType};

pub(crate) fn pin_root<C: PageCache>(cache: &C, meta_head: u64, page_type: PageType) -> C::Handle {
    cache
        .get(meta_head, true, page_type)
        .unwrap_or_else(|| panic!("meta_head {:#x} must exist", meta_head))
}

pub(crate) fn unpin_root<C: PageCache>(cache: &C, handle: C::Handle) {
    cache.unget(handle);
}
