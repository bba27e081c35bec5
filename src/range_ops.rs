//! Range operations: thin specializations of [`crate::traversal::for_each`],
//! each supplying a per-extent action and interpreting the
//! `fully_released` return the way its own semantics call for.
use crate::data_config::DataConfig;
use crate::page_cache::{PageCache, PageType};
use crate::traversal::{self, KeyRange};

/// Hands every extent in `query` back to the extent allocator.
/// Returns `true` iff the whole stream is now fully released (and, in
/// that case, its own metadata extents have also been freed by
/// `for_each`).
pub(crate) fn range_release<C: PageCache>(
    cache: &C,
    data_config: &dyn DataConfig,
    meta_head: u64,
    page_type: PageType,
    query: KeyRange,
) -> bool {
    let fully_released = traversal::for_each(cache, data_config, meta_head, page_type, query, |addr| {
        cache.dealloc(addr, page_type)
    });

    if fully_released {
        log::warn!(
            "mini allocator range_release fully released the stream rooted at meta_head={:#x}",
            meta_head
        );
    }

    fully_released
}

/// Increments the refcount of every extent in `query`, e.g. when
/// cloning a subrange between two consumers.
pub(crate) fn range_incref<C: PageCache>(
    cache: &C,
    data_config: &dyn DataConfig,
    meta_head: u64,
    page_type: PageType,
    query: KeyRange,
) {
    traversal::for_each(cache, data_config, meta_head, page_type, query, |addr| {
        cache.allocator().inc_refcount(addr);
        false
    });
}

/// Flushes every extent in `query`, accumulating the number of pages
/// still dirty after each flush into `pages_outstanding`.
pub(crate) fn range_sync<C: PageCache>(
    cache: &C,
    data_config: &dyn DataConfig,
    meta_head: u64,
    page_type: PageType,
    query: KeyRange,
    pages_outstanding: &mut u64,
) {
    traversal::for_each(cache, data_config, meta_head, page_type, query, |addr| {
        cache.extent_sync(addr, pages_outstanding);
        false
    });
}

/// Issues an extent-level prefetch for every extent in `query`.
pub(crate) fn range_prefetch<C: PageCache>(
    cache: &C,
    data_config: &dyn DataConfig,
    meta_head: u64,
    page_type: PageType,
    query: KeyRange,
) {
    traversal::for_each(cache, data_config, meta_head, page_type, query, |addr| {
        cache.prefetch(addr, page_type);
        false
    });
}

/// Counts the extents in `query`.
pub(crate) fn extent_count_in_range<C: PageCache>(
    cache: &C,
    data_config: &dyn DataConfig,
    meta_head: u64,
    page_type: PageType,
    query: KeyRange,
) -> u64 {
    let mut count = 0u64;
    traversal::for_each(cache, data_config, meta_head, page_type, query, |_addr| {
        count += 1;
        false
    });
    count
}
