//! The metadata traversal engine (`for_each`): walks the metadata chain
//! under claim+lock, applies a per-extent action to every entry whose
//! key range intersects the query, and — once every entry in the whole
//! chain has gone to `released`, detects that and frees the chain's
//! own backing extents too.
use std::cmp::Ordering;

use crate::data_config::DataConfig;
use crate::entry::EntryView;
use crate::meta_page::{self, Header};
use crate::page_cache::{PageCache, PageType};
use crate::page_guard::LockedPage;

/// A query range over keys; an empty slice on either end means
/// "unbounded on this side".
#[derive(Clone, Copy, Debug)]
pub struct KeyRange<'a> {
    pub start: &'a [u8],
    pub end: &'a [u8],
}

impl<'a> KeyRange<'a> {
    pub const fn unbounded() -> Self {
        KeyRange { start: &[], end: &[] }
    }
}

/// `lower <= upper`, treating an empty `lower` as `-infinity` and an
/// empty `upper` as `+infinity`.
fn le_bound(dc: &dyn DataConfig, lower: &[u8], upper: &[u8]) -> bool {
    if lower.is_empty() || upper.is_empty() {
        return true;
    }
    dc.key_compare(lower, upper) != Ordering::Greater
}

/// Is `[entry_start, entry_end]` in range for `query`?
pub(crate) fn entry_in_range(
    dc: &dyn DataConfig,
    query: KeyRange,
    entry_start: &[u8],
    entry_end: &[u8],
) -> bool {
    if query.start.is_empty() && query.end.is_empty() {
        return true;
    }

    if query.end.is_empty() {
        // Point query: `query.start` must itself fall inside the
        // entry's range.
        return le_bound(dc, query.start, entry_end) && le_bound(dc, entry_start, query.start);
    }

    le_bound(dc, query.start, entry_end) && le_bound(dc, entry_start, query.end)
}

/// Walks the metadata chain starting at `meta_head`, invoking
/// `action(extent_addr) -> released` for every entry in range and
/// recording the result back into that entry's `released` bit.
///
/// Returns `true` iff, after the walk, every entry across every page
/// of the chain is released — in which case the chain's own metadata
/// extents have also been handed to `action` before this returns.
pub(crate) fn for_each<C: PageCache>(
    cache: &C,
    data_config: &dyn DataConfig,
    meta_head: u64,
    page_type: PageType,
    query: KeyRange,
    mut action: impl FnMut(u64) -> bool,
) -> bool {
    let mut fully_released = true;
    let mut addr = meta_head;

    loop {
        let mut page = LockedPage::acquire(cache, addr, page_type);
        let header = Header::read(page.data());

        let mut offsets_and_sizes = Vec::with_capacity(header.num_entries as usize);
        meta_page::for_each_entry_offset(page.data(), &header, |offset, view| {
            offsets_and_sizes.push(offset_entry_summary(offset, view));
        });

        for summary in offsets_and_sizes {
            if !entry_in_range(data_config, query, &summary.start_key, &summary.end_key) {
                // Out of range, so untouched by this walk: fold its
                // current bit into the AND rather than skipping it,
                // or a live entry outside `query` would be silently
                // dropped from the "every entry released" check below.
                fully_released = fully_released && summary.released;
                continue;
            }

            assert!(
                !summary.released,
                "for_each visited an in-range entry already marked released (extent {:#x})",
                summary.extent_addr
            );

            let released = action(summary.extent_addr);
            crate::entry::set_released(&mut page.data_mut()[summary.offset..], released);
            fully_released = fully_released && released;
        }

        page.mark_dirty();
        let next = header.next_meta_addr;
        drop(page);

        if next == 0 {
            break;
        }
        addr = next;
    }

    if fully_released {
        free_metadata_chain(cache, meta_head, page_type, &mut action);
    }

    fully_released
}

struct EntrySummary {
    offset: usize,
    extent_addr: u64,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    released: bool,
}

fn offset_entry_summary(offset: usize, view: &EntryView) -> EntrySummary {
    EntrySummary {
        offset,
        extent_addr: view.extent_addr(),
        start_key: view.start_key().to_vec(),
        end_key: view.end_key().to_vec(),
        released: view.released(),
    }
}

/// Second pass over the chain, run only once every entry has been
/// released: frees the metadata pages' own extents, one `action` call
/// per distinct extent rather than per page.
fn free_metadata_chain<C: PageCache>(
    cache: &C,
    meta_head: u64,
    page_type: PageType,
    action: &mut impl FnMut(u64) -> bool,
) {
    let extent_size = cache.extent_size();
    let mut addr = meta_head;
    let mut prev_base: Option<u64> = None;

    loop {
        let base = addr - (addr % extent_size);
        if prev_base != Some(base) {
            if let Some(pb) = prev_base {
                action(pb);
            }
        }
        prev_base = Some(base);

        let handle = cache
            .get(addr, true, page_type)
            .unwrap_or_else(|| panic!("metadata page at {:#x} must exist", addr));
        let next = Header::read(unsafe { handle.data() }).next_meta_addr;
        cache.unget(handle);

        if next == 0 {
            break;
        }
        addr = next;
    }

    if let Some(pb) = prev_base {
        action(pb);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_config::BytesDataConfig;

    #[test]
    fn unbounded_query_matches_everything() {
        let dc = BytesDataConfig;
        assert!(entry_in_range(&dc, KeyRange::unbounded(), b"a", b"z"));
        assert!(entry_in_range(&dc, KeyRange::unbounded(), b"", b""));
    }

    #[test]
    fn point_query_requires_containment() {
        let dc = BytesDataConfig;
        let query = KeyRange { start: b"m", end: &[] };
        assert!(entry_in_range(&dc, query, b"a", b"z"));
        assert!(!entry_in_range(&dc, query, b"n", b"z"));
        assert!(!entry_in_range(&dc, query, b"a", b"b"));
    }

    #[test]
    fn interval_query_requires_overlap() {
        let dc = BytesDataConfig;
        let query = KeyRange { start: b"c", end: b"e" };
        assert!(entry_in_range(&dc, query, b"a", b"d"));
        assert!(entry_in_range(&dc, query, b"d", b"z"));
        assert!(!entry_in_range(&dc, query, b"a", b"b"));
        assert!(!entry_in_range(&dc, query, b"f", b"z"));
    }

    #[test]
    fn unbounded_entry_sides_match_either_direction() {
        let dc = BytesDataConfig;
        let query = KeyRange { start: b"c", end: b"e" };
        // entry covers all keys
        assert!(entry_in_range(&dc, query, b"", b""));
    }
}
