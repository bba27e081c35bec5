//! The per-batch allocation cursor: a single `u64` slot that doubles as
//! a spinlock via a reserved sentinel value, compare-and-swapped rather
//! than guarded by a `Mutex` since its hold time is measured in
//! instructions, not I/O waits.
use std::sync::atomic::{AtomicU64, Ordering};

/// `next_addr[b]` takes this value while some thread owns the cursor.
/// No real page address can equal it: every page address is a
/// multiple of the (much larger than 1) page size.
pub(crate) const MINI_WAIT: u64 = 1;

const BACKOFF_CAP: u32 = 1024;

/// Bounded exponential backoff, doubling from 1 up to
/// [`BACKOFF_CAP`], as specified for both the cursor CAS loop and the
/// page-claim retry loop.
pub(crate) struct Backoff {
    spins: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Backoff { spins: 1 }
    }

    pub(crate) fn spin(&mut self) {
        for _ in 0..self.spins {
            std::hint::spin_loop();
        }
        self.spins = (self.spins * 2).min(BACKOFF_CAP);
    }
}

/// Spins until `next_addr` holds a real value, then CASes it to
/// [`MINI_WAIT`] and returns the value that was there. The caller now
/// owns the batch's cursor and must eventually call
/// [`release_cursor`].
pub(crate) fn acquire_cursor(next_addr: &AtomicU64) -> u64 {
    let mut backoff = Backoff::new();
    loop {
        let observed = next_addr.load(Ordering::Acquire);
        if observed == MINI_WAIT {
            backoff.spin();
            continue;
        }

        match next_addr.compare_exchange_weak(
            observed,
            MINI_WAIT,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return observed,
            Err(_) => backoff.spin(),
        }
    }
}

/// Releases a cursor previously acquired with [`acquire_cursor`],
/// installing `new_value` as the batch's next address. Must run
/// before any page-cache lock is taken, so the cursor never blocks on
/// I/O.
pub(crate) fn release_cursor(next_addr: &AtomicU64, new_value: u64) {
    debug_assert_ne!(new_value, MINI_WAIT, "a real page address can never collide with MINI_WAIT");
    next_addr.store(new_value, Ordering::Release);
}
