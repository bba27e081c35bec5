//! A fine-grained per-page allocator built on top of a coarse-grained
//! extent allocator and a buffered page cache.
//!
//! A [`MiniAllocator`] manages one logical allocation stream (typically
//! belonging to one B-tree, log, or similar structure) by carving
//! individual pages out of whole extents reserved from an
//! [`ExtentAllocator`], while maintaining a persistent linked list of
//! metadata pages recording which extents belong to the stream and
//! over what key ranges those extents contain data. Multiple
//! independent *batches* share one mini allocator's metadata chain
//! while allocating pages in parallel.
//!
//! This crate does not implement a page cache or an extent allocator;
//! it consumes both through the [`PageCache`] and [`ExtentAllocator`]
//! traits. See [`testing`] for in-process fakes implementing both,
//! used by this crate's own test suite.
mod cursor;
mod data_config;
mod entry;
mod error;
mod extent_allocator;
mod meta_page;
mod mini_allocator;
mod page_cache;
mod page_guard;
mod quick_path;
mod range_ops;
mod traversal;

pub mod testing;

pub use data_config::{BytesDataConfig, DataConfig};
pub use entry::MAX_INLINE_KEY_SIZE;
pub use error::MiniAllocatorError;
pub use extent_allocator::ExtentAllocator;
pub use mini_allocator::{Allocation, MiniAllocator, MiniAllocatorConfig, MINI_MAX_BATCHES};
pub use page_cache::{PageCache, PageHandle, PageType};
pub use traversal::KeyRange;

#[cfg(test)]
mod integration_test {
    use super::*;
    use crate::testing::{BytesDataConfig, TestPageCache};

    fn new_fixture(page_size: u64, extent_size: u64) -> (TestPageCache, BytesDataConfig) {
        (TestPageCache::new(page_size, extent_size), BytesDataConfig)
    }

    /// Four allocations stay within one extent, the fifth crosses into
    /// a new one, and the metadata chain records exactly two entries
    /// with the expected key bounds.
    #[test]
    fn extent_boundary_crossing_creates_a_new_entry() {
        let (cache, dc) = new_fixture(4096, 16384);
        let config = MiniAllocatorConfig {
            page_type: PageType(0),
            num_batches: 1,
        };
        let (mini, first_extent) = MiniAllocator::init(&cache, &dc, 0, 0, config).unwrap();

        let a1 = mini.alloc(0, b"a").unwrap();
        assert_eq!(a1.page_addr, first_extent);
        let a2 = mini.alloc(0, b"a").unwrap();
        let a3 = mini.alloc(0, b"a").unwrap();
        let a4 = mini.alloc(0, b"a").unwrap();
        assert_eq!(a2.page_addr, a1.page_addr + 4096);
        assert_eq!(a3.page_addr, a2.page_addr + 4096);
        assert_eq!(a4.page_addr, a3.page_addr + 4096);

        let a5 = mini.alloc(0, b"b").unwrap();
        assert_eq!(a5.page_addr % 16384, 0);
        assert_ne!(a5.page_addr, a1.page_addr);

        assert_eq!(mini.extent_count_in_range(KeyRange::unbounded()), 2);
    }

    /// `release` backfills the open entry's `end_key`
    /// and frees the unused reserve extent.
    #[test]
    fn release_backfills_end_key_and_frees_reserve() {
        let (cache, dc) = new_fixture(4096, 16384);
        let config = MiniAllocatorConfig {
            page_type: PageType(0),
            num_batches: 1,
        };
        let (mini, _) = MiniAllocator::init(&cache, &dc, 0, 0, config).unwrap();

        for _ in 0..4 {
            mini.alloc(0, b"a").unwrap();
        }
        let a5 = mini.alloc(0, b"b").unwrap();

        let refcount_before = cache.allocator().get_refcount(a5.next_extent);
        assert_eq!(refcount_before, 1);

        mini.release(b"c").unwrap();

        assert_eq!(cache.allocator().get_refcount(a5.next_extent), 0);
        assert_eq!(mini.extent_count_in_range(KeyRange::unbounded()), 2);
    }

    /// After release, `range_release` frees every live extent plus the
    /// metadata chain's own extent, and the stream is reported fully
    /// released.
    #[test]
    fn range_release_frees_everything_including_metadata() {
        let (cache, dc) = new_fixture(4096, 16384);
        let config = MiniAllocatorConfig {
            page_type: PageType(0),
            num_batches: 1,
        };
        let (mini, _) = MiniAllocator::init(&cache, &dc, 0, 0, config).unwrap();

        for _ in 0..4 {
            mini.alloc(0, b"a").unwrap();
        }
        mini.alloc(0, b"b").unwrap();
        mini.release(b"c").unwrap();

        let meta_head = mini.meta_head();
        assert_eq!(cache.allocator().get_refcount(meta_head), 1);

        let fully_released = mini.range_release(KeyRange::unbounded());
        assert!(fully_released);

        assert_eq!(mini.extent_count_in_range(KeyRange::unbounded()), 0);
        assert_eq!(cache.allocator().get_refcount(meta_head), 0);
    }

    /// A narrow range release that falls strictly inside the middle
    /// entry's key bounds only flips that entry, leaving its neighbors
    /// (whose bounds it shares no endpoint with, so the closed-interval
    /// predicate cannot also pull them in) untouched and the metadata
    /// chain intact.
    #[test]
    fn narrow_range_release_only_frees_the_covered_entry() {
        let (cache, dc) = new_fixture(4096, 16384);
        let config = MiniAllocatorConfig {
            page_type: PageType(0),
            num_batches: 1,
        };
        let (mini, _) = MiniAllocator::init(&cache, &dc, 0, 0, config).unwrap();

        // entry1 = [a, b) over the first extent.
        for _ in 0..4 {
            mini.alloc(0, b"a").unwrap();
        }
        // entry2 = [b, c) over the second extent.
        let entry2 = mini.alloc(0, b"b").unwrap().page_addr;
        for _ in 0..3 {
            mini.alloc(0, b"b").unwrap();
        }
        // entry3 = [c, ...) over the third extent.
        let entry3 = mini.alloc(0, b"c").unwrap().page_addr;
        mini.release(b"d").unwrap();

        // "bb" falls strictly between entry1's end ("b") and entry2's
        // end ("c"), so only entry2 is in range.
        let fully_released = mini.range_release(KeyRange { start: b"bb", end: b"bb" });
        assert!(!fully_released);

        assert_eq!(cache.allocator().get_refcount(entry2), 0);
        assert_eq!(cache.allocator().get_refcount(entry3), 1);

        let meta_head = mini.meta_head();
        assert_eq!(cache.allocator().get_refcount(meta_head), 1);

        // A read-style op confined to a range that excludes the
        // now-released entry2 must not trip the traversal engine's
        // released-entry assertion.
        assert_eq!(mini.extent_count_in_range(KeyRange { start: b"ca", end: &[] }), 1);
    }

    /// Enough refills against a one-page-per-extent configuration force
    /// the metadata chain to roll over to a second tail page; the old
    /// tail's `next_meta_addr` follows it and the new tail starts with
    /// exactly one entry.
    #[test]
    fn enough_allocations_force_a_new_metadata_tail_page() {
        use crate::meta_page;
        use crate::page_guard::LockedPage;

        // extent_size == page_size: every alloc refills, so a handful
        // of calls already pack more entries onto the tail page than
        // `entry::ENTRY_WORST_CASE_SIZE` leaves room for.
        let (cache, dc) = new_fixture(512, 512);
        let config = MiniAllocatorConfig {
            page_type: PageType(0),
            num_batches: 1,
        };
        let (mini, _) = MiniAllocator::init(&cache, &dc, 0, 0, config).unwrap();

        let old_tail = mini.meta_tail();
        let mut rolled_over = false;
        for _ in 0..20 {
            mini.alloc(0, b"a").unwrap();
            if mini.meta_tail() != old_tail {
                rolled_over = true;
                break;
            }
        }
        assert!(rolled_over, "expected a metadata rollover within 20 refills");

        let new_tail = mini.meta_tail();
        assert_ne!(old_tail, new_tail);

        let old_page = LockedPage::acquire(&cache, old_tail, PageType(0));
        let old_header = meta_page::Header::read(old_page.data());
        assert_eq!(old_header.next_meta_addr, new_tail);
        drop(old_page);

        let new_page = LockedPage::acquire(&cache, new_tail, PageType(0));
        let new_header = meta_page::Header::read(new_page.data());
        assert_eq!(new_header.num_entries, 1);
        assert_eq!(new_header.pos as usize, meta_page::HEADER_SIZE + crate::entry::ENTRY_FIXED_SIZE + 1);
    }

    /// Two batches allocate concurrently; each batch's own page
    /// sequence stays strictly monotone.
    #[test]
    fn two_batches_allocate_independently() {
        use std::thread;

        let (cache, dc) = new_fixture(4096, 16384);
        let config = MiniAllocatorConfig {
            page_type: PageType(0),
            num_batches: 2,
        };
        let (mini, _) = MiniAllocator::init(&cache, &dc, 0, 0, config).unwrap();

        let mut batch0 = Vec::new();
        let mut batch1 = Vec::new();
        thread::scope(|scope| {
            let h0 = scope.spawn(|| {
                let mut addrs = Vec::new();
                for _ in 0..12 {
                    addrs.push(mini.alloc(0, b"k").unwrap().page_addr);
                }
                addrs
            });
            let h1 = scope.spawn(|| {
                let mut addrs = Vec::new();
                for _ in 0..12 {
                    addrs.push(mini.alloc(1, b"k").unwrap().page_addr);
                }
                addrs
            });
            batch0 = h0.join().unwrap();
            batch1 = h1.join().unwrap();
        });

        for addrs in [&batch0, &batch1] {
            for pair in addrs.windows(2) {
                assert!(pair[1] > pair[0], "addresses must be strictly increasing within a batch");
            }
        }

        let total_unique: std::collections::HashSet<_> =
            batch0.iter().chain(batch1.iter()).collect();
        assert_eq!(total_unique.len(), batch0.len() + batch1.len(), "no duplicate addresses across batches");
    }
}
