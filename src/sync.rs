//! Lock domains.
//!
//! Three kinds of critical section exist in the host:
//!
//! * the **idle lock**, one per host, guarding the idle registry while a tick
//!   walks it;
//! * the **processing lock**, one per instance, guarding every call into the
//!   plugin object (audio thread, idle thread and clients all go through it);
//! * the **forwarding lock**, one per host, guarding the forwarding lists.
//!
//! The idle lock may be held while a processing lock is taken.  The reverse
//! is forbidden: the audio thread only ever takes processing locks, so a
//! thread that waits for the idle lock while holding one can deadlock against
//! a running tick.  Debug builds track processing locks per thread and panic
//! on the forbidden order.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

thread_local! {
    static PROCESSING_HELD: Cell<u32> = const { Cell::new(0) };
}

/// Number of processing locks the calling thread currently holds.
pub fn processing_locks_held() -> u32 {
    PROCESSING_HELD.try_with(|held| held.get()).unwrap_or(0)
}

fn adjust_held(delta: i32) {
    let _ = PROCESSING_HELD.try_with(|held| {
        held.set(held.get().saturating_add_signed(delta));
    });
}

// ---------------------------------------------------------------------------
// Idle lock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct IdleLock<T> {
    inner: Mutex<T>,
}

impl<T> IdleLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        debug_assert!(
            processing_locks_held() == 0,
            "idle lock requested while holding a processing lock"
        );
        self.inner.lock()
    }
}

// ---------------------------------------------------------------------------
// Processing lock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ProcessingLock<T> {
    inner: Mutex<T>,
}

/// Scoped hold on an instance's processing lock.
pub struct ProcessingGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> ProcessingLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> ProcessingGuard<'_, T> {
        let guard = self.inner.lock();
        adjust_held(1);
        ProcessingGuard { guard }
    }
}

impl<T> Deref for ProcessingGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ProcessingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for ProcessingGuard<'_, T> {
    fn drop(&mut self) {
        adjust_held(-1);
    }
}

// ---------------------------------------------------------------------------
// Forwarding lock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ForwardLock<T> {
    inner: Mutex<T>,
}

impl<T> ForwardLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}
