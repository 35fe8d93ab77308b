//! Deferred library unloading.
//!
//! When the last reference to an instance goes away, the plugin's own
//! dispatcher may still be unwinding on another thread's stack.  Unmapping
//! the library at that point would pull the code out from under it, so the
//! library is parked here instead and only unloaded once a countdown of idle
//! ticks has run out.  Every new request resets the countdown, so a burst of
//! releases keeps pushing the flush further out.
//!
//! This is a time-based safety margin, not in-flight call tracking.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::plugin::LibraryId;

#[derive(Debug, Default)]
pub(crate) struct PendingUnloads {
    counts: HashMap<LibraryId, u32>,
    countdown: u32,
}

impl PendingUnloads {
    pub(crate) fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

pub struct DeferredUnloader {
    pending: Mutex<PendingUnloads>,
    countdown_ticks: u32,
}

impl DeferredUnloader {
    pub fn new(countdown_ticks: u32) -> Self {
        Self {
            pending: Mutex::new(PendingUnloads::default()),
            countdown_ticks: countdown_ticks.max(1),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PendingUnloads> {
        self.pending.lock()
    }

    /// Queue one unload of `lib` and restart the countdown.
    pub fn schedule(&self, lib: LibraryId) {
        let mut pending = self.pending.lock();
        *pending.counts.entry(lib).or_insert(0) += 1;
        pending.countdown = self.countdown_ticks;
        log::debug!(
            "Library {:#x} queued for unload ({} pending, flush in {} ticks)",
            lib.as_raw(),
            pending.counts[&lib],
            pending.countdown
        );
    }

    /// Advance the countdown by one tick.  When it expires, the whole
    /// registry is drained and returned as `(library, unload count)` pairs
    /// for the caller to release.
    pub fn tick(&self) -> Vec<(LibraryId, u32)> {
        let mut pending = self.pending.lock();
        if pending.counts.is_empty() {
            return Vec::new();
        }
        pending.countdown = pending.countdown.saturating_sub(1);
        if pending.countdown > 0 {
            return Vec::new();
        }
        pending.counts.drain().collect()
    }

    /// Drain everything regardless of the countdown (host shutdown).
    pub fn flush_now(&self) -> Vec<(LibraryId, u32)> {
        let mut pending = self.pending.lock();
        pending.countdown = 0;
        pending.counts.drain().collect()
    }

    pub fn pending(&self, lib: LibraryId) -> u32 {
        self.pending.lock().counts.get(&lib).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Ticks left before the next flush (0 when nothing is pending).
    pub fn countdown(&self) -> u32 {
        let pending = self.pending.lock();
        if pending.is_empty() { 0 } else { pending.countdown }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB_A: LibraryId = LibraryId::from_raw(0xa);
    const LIB_B: LibraryId = LibraryId::from_raw(0xb);

    #[test]
    fn test_flush_after_countdown() {
        let unloader = DeferredUnloader::new(3);
        unloader.schedule(LIB_A);
        assert_eq!(unloader.pending(LIB_A), 1);

        assert!(unloader.tick().is_empty());
        assert!(unloader.tick().is_empty());
        assert_eq!(unloader.countdown(), 1);
        assert_eq!(unloader.tick(), vec![(LIB_A, 1)]);
        assert!(unloader.is_empty());
        assert!(unloader.tick().is_empty());
    }

    #[test]
    fn test_new_request_resets_countdown() {
        let unloader = DeferredUnloader::new(3);
        unloader.schedule(LIB_A);
        unloader.tick();
        unloader.tick();

        unloader.schedule(LIB_A);
        unloader.schedule(LIB_B);
        assert_eq!(unloader.countdown(), 3);
        assert!(unloader.tick().is_empty());
        assert!(unloader.tick().is_empty());

        let mut flushed = unloader.tick();
        flushed.sort_by_key(|(lib, _)| lib.as_raw());
        assert_eq!(flushed, vec![(LIB_A, 2), (LIB_B, 1)]);
    }

    #[test]
    fn test_idle_ticks_without_requests_do_nothing() {
        let unloader = DeferredUnloader::new(1);
        for _ in 0..5 {
            assert!(unloader.tick().is_empty());
        }
        assert_eq!(unloader.countdown(), 0);
    }

    #[test]
    fn test_flush_now_ignores_countdown() {
        let unloader = DeferredUnloader::new(100);
        unloader.schedule(LIB_B);
        assert_eq!(unloader.flush_now(), vec![(LIB_B, 1)]);
        assert!(unloader.is_empty());
    }
}
