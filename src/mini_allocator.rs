//! Mini allocator state and the `init`/`alloc`/`release` control flow:
//! the part of this crate that actually ties the page cache, the
//! extent allocator, and the metadata chain together.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")
))]
use disabled_contracts::*;

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data_config::DataConfig;
use crate::entry;
use crate::error::MiniAllocatorError;
use crate::meta_page::Header;
use crate::page_cache::{PageCache, PageType};
use crate::page_guard::LockedPage;
use crate::{cursor, quick_path, range_ops, traversal};

/// Largest `num_batches` this crate supports. Chosen generously (every
/// batch is one `AtomicU64` plus a handful of bookkeeping words, so the
/// memory cost of a high ceiling is negligible) and asserted against
/// at `init`/`load` time. See `DESIGN.md` for this call.
pub const MINI_MAX_BATCHES: usize = 64;

/// Per-batch allocation cursor and the bookkeeping needed to backfill
/// that batch's previous metadata entry. `next_extent` is touched only
/// while its batch's cursor is held (fast path reads it, slow path
/// writes it before releasing the cursor). `last_meta_addr`/
/// `last_meta_pos` are touched only from inside `append_metadata_entry`,
/// which holds the metadata tail page locked for its entire body — and
/// since every batch's refill appends to the same tail, that lock
/// already serializes all of them; see `DESIGN.md`.
struct BatchState {
    next_addr: AtomicU64,
    next_extent: UnsafeCell<u64>,
    last_meta_addr: UnsafeCell<u64>,
    last_meta_pos: UnsafeCell<u32>,
}

// SAFETY: see the field-by-field access note above.
unsafe impl Sync for BatchState {}

impl BatchState {
    fn fresh(next_addr: u64, reserve_extent: u64) -> Self {
        BatchState {
            next_addr: AtomicU64::new(next_addr),
            next_extent: UnsafeCell::new(reserve_extent),
            last_meta_addr: UnsafeCell::new(0),
            last_meta_pos: UnsafeCell::new(0),
        }
    }
}

/// Configuration bundled at `init`/`load` time, validated once.
#[derive(Clone, Copy, Debug)]
pub struct MiniAllocatorConfig {
    pub page_type: PageType,
    pub num_batches: usize,
}

/// The result of one [`MiniAllocator::alloc`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// The page the caller should write into.
    pub page_addr: u64,
    /// This batch's current reserve extent, for callers that want to
    /// start prefetching it.
    pub next_extent: u64,
}

/// One mini allocator: a fine-grained per-page allocator carved out of
/// whole extents reserved from `C::ExtentAllocator`, with a persistent
/// metadata chain recording which extents belong to it and over what
/// key ranges.
pub struct MiniAllocator<'c, C: PageCache> {
    cache: &'c C,
    data_config: &'c dyn DataConfig,
    meta_head: u64,
    meta_tail: AtomicU64,
    page_type: PageType,
    batches: Vec<BatchState>,
}

impl<'c, C: PageCache> MiniAllocator<'c, C> {
    /// Creates a brand-new mini allocator (if `meta_tail == 0`) or
    /// attaches to an existing one's tail (otherwise). Returns the
    /// mini allocator plus the extent address reserved for batch 0's
    /// first allocation — the caller typically records this as the
    /// root of whatever structure it is about to build.
    #[requires(config.num_batches >= 1 && config.num_batches <= MINI_MAX_BATCHES,
               "num_batches must be in [1, MINI_MAX_BATCHES]")]
    pub fn init(
        cache: &'c C,
        data_config: &'c dyn DataConfig,
        meta_head: u64,
        meta_tail: u64,
        config: MiniAllocatorConfig,
    ) -> Result<(Self, u64), MiniAllocatorError> {
        assert!(
            config.num_batches >= 1 && config.num_batches <= MINI_MAX_BATCHES,
            "num_batches={} out of range [1, {}]",
            config.num_batches,
            MINI_MAX_BATCHES
        );

        let (resolved_head, resolved_tail) = if meta_tail == 0 {
            assert_eq!(meta_head, 0, "a fresh mini allocator must start with meta_head == 0");
            let head = cache.allocator().alloc_extent()?;
            let page = cache.alloc(head, config.page_type);
            let mut page = LockedPage::from_new(cache, page);
            Header::fresh().write(page.data_mut());
            page.mark_dirty();
            drop(page);
            (head, head)
        } else {
            let page = LockedPage::acquire(cache, meta_tail, config.page_type);
            drop(page);
            (meta_head, meta_tail)
        };

        let mut batches = Vec::with_capacity(config.num_batches);
        let mut first_reserve = 0u64;
        for b in 0..config.num_batches {
            let reserve = cache.allocator().alloc_extent()?;
            if b == 0 {
                first_reserve = reserve;
            }
            batches.push(BatchState::fresh(0, reserve));
        }

        log::debug!(
            "mini allocator init: meta_head={:#x} meta_tail={:#x} num_batches={}",
            resolved_head,
            resolved_tail,
            config.num_batches
        );

        Ok((
            MiniAllocator {
                cache,
                data_config,
                meta_head: resolved_head,
                meta_tail: AtomicU64::new(resolved_tail),
                page_type: config.page_type,
                batches,
            },
            first_reserve,
        ))
    }

    pub fn meta_head(&self) -> u64 {
        self.meta_head
    }

    pub fn meta_tail(&self) -> u64 {
        self.meta_tail.load(Ordering::Acquire)
    }

    fn check_key(key: &[u8]) -> Result<(), MiniAllocatorError> {
        if key.len() > entry::MAX_INLINE_KEY_SIZE {
            return Err(MiniAllocatorError::KeyTooLong { len: key.len() });
        }
        Ok(())
    }

    fn batch(&self, batch: usize) -> &BatchState {
        assert!(
            batch < self.batches.len(),
            "batch index {} out of range [0, {})",
            batch,
            self.batches.len()
        );
        &self.batches[batch]
    }

    /// Returns the address of the next free page in `batch`, advancing
    /// its cursor. `key` becomes the new metadata entry's `start_key`
    /// iff this call triggers a fresh-extent refill; an empty `key`
    /// skips key bookkeeping for this call.
    pub fn alloc(&self, batch: usize, key: &[u8]) -> Result<Allocation, MiniAllocatorError> {
        Self::check_key(key)?;
        let state = self.batch(batch);
        let page_size = self.cache.page_size();
        let extent_size = self.cache.extent_size();

        let observed = cursor::acquire_cursor(&state.next_addr);

        if observed % extent_size != 0 {
            // Fast path: current extent has room. Snapshot the
            // reserve extent before releasing the cursor -- once
            // released, another thread may refill concurrently and
            // mutate it.
            let next_extent = unsafe { *state.next_extent.get() };
            let page = observed;
            cursor::release_cursor(&state.next_addr, page + page_size);

            log::trace!("mini allocator fast alloc: batch={} page={:#x}", batch, page);
            return Ok(Allocation { page_addr: page, next_extent });
        }

        // Slow path: refill from the pre-reserved extent.
        let page = unsafe { *state.next_extent.get() };

        let new_reserve = match self.cache.allocator().alloc_extent() {
            Ok(addr) => addr,
            Err(e) => {
                // Nothing has been mutated yet; hand the cursor back
                // untouched.
                cursor::release_cursor(&state.next_addr, observed);
                return Err(e);
            }
        };

        unsafe {
            *state.next_extent.get() = new_reserve;
        }
        cursor::release_cursor(&state.next_addr, page + page_size);

        self.append_metadata_entry(state, page, key);

        log::trace!(
            "mini allocator refill: batch={} page={:#x} new_reserve={:#x}",
            batch,
            page,
            new_reserve
        );

        Ok(Allocation { page_addr: page, next_extent: new_reserve })
    }

    /// Appends a new metadata entry for `page`, rolling the tail page
    /// over if it lacks room, and backfills the batch's previous
    /// entry's `end_key` if warranted.
    fn append_metadata_entry(&self, state: &BatchState, page: u64, key: &[u8]) {
        let page_size = self.cache.page_size() as usize;
        let extent_size = self.cache.extent_size();

        let mut tail_addr = loop {
            let addr = self.meta_tail.load(Ordering::Acquire);
            let locked = LockedPage::acquire(self.cache, addr, self.page_type);
            if self.meta_tail.load(Ordering::Acquire) == addr {
                break locked;
            }
            drop(locked);
        };

        let mut header = Header::read(tail_addr.data());
        let mut rolled_over = false;

        if header.pos as usize + entry::ENTRY_WORST_CASE_SIZE > page_size {
            rolled_over = true;
            let mut new_meta_tail = self.meta_tail.load(Ordering::Acquire) + page_size as u64;
            if new_meta_tail % extent_size == 0 {
                new_meta_tail = self
                    .cache
                    .allocator()
                    .alloc_extent()
                    .expect("extent allocator exhaustion is fatal for metadata rollover");
            }

            header.next_meta_addr = new_meta_tail;
            header.write(tail_addr.data_mut());
            tail_addr.mark_dirty();
            drop(tail_addr);

            let new_page = self.cache.alloc(new_meta_tail, self.page_type);
            let mut new_tail = LockedPage::from_new(self.cache, new_page);
            header = Header::fresh();
            header.write(new_tail.data_mut());

            self.meta_tail.store(new_meta_tail, Ordering::Release);
            tail_addr = new_tail;
        }

        let pos = header.pos as usize;
        let start_key = if key.is_empty() { &[][..] } else { key };
        let entry_size = entry::write_new_entry(&mut tail_addr.data_mut()[pos..], page, start_key);

        if !key.is_empty() {
            let prev_addr = unsafe { *state.last_meta_addr.get() };
            if prev_addr != 0 {
                let prev_pos = unsafe { *state.last_meta_pos.get() } as usize;
                if prev_addr == tail_addr.addr() {
                    entry::set_end_key(&mut tail_addr.data_mut()[prev_pos..], key);
                } else {
                    let mut prev_page = LockedPage::acquire(self.cache, prev_addr, self.page_type);
                    entry::set_end_key(&mut prev_page.data_mut()[prev_pos..], key);
                    prev_page.mark_dirty();
                    drop(prev_page);
                }
            }
        }

        unsafe {
            *state.last_meta_addr.get() = tail_addr.addr();
            *state.last_meta_pos.get() = pos as u32;
        }

        header.pos = (pos + entry_size) as u32;
        header.num_entries += 1;
        header.write(tail_addr.data_mut());
        tail_addr.mark_dirty();

        if rolled_over {
            log::debug!("mini allocator metadata tail rollover: new tail={:#x}", tail_addr.addr());
        }
    }

    /// Releases this mini allocator's per-batch reserve extents and
    /// closes out each batch's open key range. Does not traverse the
    /// chain or touch `released` flags; see [`MiniAllocator::range_release`]
    /// for handing the stream's extents back.
    ///
    /// An empty `key` deallocates the reserves but leaves the final
    /// entries' `end_key` empty; see `DESIGN.md`'s open-question
    /// resolution for why this mirrors the source behavior rather than
    /// treating it as a bug.
    pub fn release(&self, key: &[u8]) -> Result<(), MiniAllocatorError> {
        Self::check_key(key)?;

        for state in &self.batches {
            let reserve = unsafe { *state.next_extent.get() };
            self.cache.dealloc(reserve, self.page_type);

            if !key.is_empty() {
                let prev_addr = unsafe { *state.last_meta_addr.get() };
                if prev_addr != 0 {
                    let prev_pos = unsafe { *state.last_meta_pos.get() } as usize;
                    let mut prev_page = LockedPage::acquire(self.cache, prev_addr, self.page_type);
                    entry::set_end_key(&mut prev_page.data_mut()[prev_pos..], key);
                    prev_page.mark_dirty();
                }
            }
        }

        log::debug!("mini allocator release: meta_head={:#x}", self.meta_head);
        Ok(())
    }

    /// Increments the refcount of every extent whose entry intersects
    /// `query`. Used when cloning a subrange between two consumers of
    /// the same mini allocator.
    pub fn range_incref(&self, query: traversal::KeyRange) {
        range_ops::range_incref(self.cache, self.data_config, self.meta_head, self.page_type, query);
    }

    /// Hands every extent whose entry intersects `query` back to the
    /// extent allocator. Returns `true` iff the whole stream is now
    /// fully released, in which case this mini allocator's own
    /// metadata extents have also been freed.
    pub fn range_release(&self, query: traversal::KeyRange) -> bool {
        range_ops::range_release(self.cache, self.data_config, self.meta_head, self.page_type, query)
    }

    /// Flushes every extent whose entry intersects `query`.
    /// `pages_outstanding` is incremented by the number of pages still
    /// dirty after each extent's flush.
    pub fn range_sync(&self, query: traversal::KeyRange, pages_outstanding: &mut u64) {
        range_ops::range_sync(
            self.cache,
            self.data_config,
            self.meta_head,
            self.page_type,
            query,
            pages_outstanding,
        );
    }

    /// Issues an extent-level prefetch for every extent whose entry
    /// intersects `query`.
    pub fn range_prefetch(&self, query: traversal::KeyRange) {
        range_ops::range_prefetch(self.cache, self.data_config, self.meta_head, self.page_type, query);
    }

    /// Counts the extents whose entry intersects `query`.
    pub fn extent_count_in_range(&self, query: traversal::KeyRange) -> u64 {
        range_ops::extent_count_in_range(self.cache, self.data_config, self.meta_head, self.page_type, query)
    }

    /// Pins `meta_head` without traversing the chain, so a caller can
    /// keep this mini allocator structurally alive.
    pub fn pin_root(&self) -> C::Handle {
        quick_path::pin_root(self.cache, self.meta_head, self.page_type)
    }

    /// Unpins a handle previously returned by [`MiniAllocator::pin_root`].
    pub fn unpin_root(&self, handle: C::Handle) {
        quick_path::unpin_root(self.cache, handle)
    }
}
