//! Metadata page header and entry-walking helpers: one fixed-size page
//! holds a small header followed by densely packed, variable-length
//! [`crate::entry`] records.
use crate::entry::EntryView;

const NEXT_META_ADDR_OFFSET: usize = 0;
const POS_OFFSET: usize = 8;
const NUM_ENTRIES_OFFSET: usize = 12;

/// `next_meta_addr` (u64) + `pos` (u32) + `num_entries` (u32).
pub const HEADER_SIZE: usize = 16;

/// In-memory copy of a metadata page's header. Entries are read
/// sequentially off the page itself; this struct never holds them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Header {
    pub next_meta_addr: u64,
    pub pos: u32,
    pub num_entries: u32,
}

impl Header {
    pub(crate) fn fresh() -> Self {
        Header {
            next_meta_addr: 0,
            pos: HEADER_SIZE as u32,
            num_entries: 0,
        }
    }

    pub(crate) fn read(page: &[u8]) -> Self {
        Header {
            next_meta_addr: u64::from_le_bytes(
                page[NEXT_META_ADDR_OFFSET..NEXT_META_ADDR_OFFSET + 8]
                    .try_into()
                    .unwrap(),
            ),
            pos: u32::from_le_bytes(page[POS_OFFSET..POS_OFFSET + 4].try_into().unwrap()),
            num_entries: u32::from_le_bytes(
                page[NUM_ENTRIES_OFFSET..NUM_ENTRIES_OFFSET + 4]
                    .try_into()
                    .unwrap(),
            ),
        }
    }

    pub(crate) fn write(&self, page: &mut [u8]) {
        page[NEXT_META_ADDR_OFFSET..NEXT_META_ADDR_OFFSET + 8]
            .copy_from_slice(&self.next_meta_addr.to_le_bytes());
        page[POS_OFFSET..POS_OFFSET + 4].copy_from_slice(&self.pos.to_le_bytes());
        page[NUM_ENTRIES_OFFSET..NUM_ENTRIES_OFFSET + 4]
            .copy_from_slice(&self.num_entries.to_le_bytes());
    }
}

/// Walks a page's entries, handing each one's byte offset and view to
/// `f`. Entries are variable length and cannot be random-accessed;
/// sequential replay from [`HEADER_SIZE`] is the only way to find
/// entry `i`'s offset.
pub(crate) fn for_each_entry_offset(page: &[u8], header: &Header, mut f: impl FnMut(usize, &EntryView)) {
    let mut offset = HEADER_SIZE;
    for _ in 0..header.num_entries {
        let view = EntryView::new(&page[offset..]);
        let size = view.on_page_size();
        f(offset, &view);
        offset += size;
    }
}
