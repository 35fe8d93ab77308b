//! Idle scheduler.
//!
//! A low-frequency timer walks every instance that asked for idle service,
//! gives it its idle / editor-idle call under the instance's processing lock,
//! polls its parameters for drift and tells the owner about it.  The same
//! tick advances the deferred-unload countdown.  The timer only exists while
//! there is something to do: it is started when the first registration or
//! unload request arrives and torn down by the first tick that finds all
//! queues empty.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::unload::DeferredUnloader;
use super::{Handle, Host};
use crate::plugin::{IdleFlags, LibraryId, NativeLibraries, Notification, NotifyFn, PluginInstance};
use crate::sync::IdleLock;
use crate::timer::{PeriodicTimer, TimerCallback};

type IdleRegistry = HashMap<Handle, IdleFlags>;

pub struct IdleScheduler {
    /// Handles wanting idle service.  Guarded by the idle lock for the whole
    /// of a tick.
    registry: IdleLock<IdleRegistry>,
    /// Idle requests made from inside a plugin dispatch.  Those run under a
    /// processing lock and may not take the idle lock; the next tick folds
    /// them into the registry.
    requests: Mutex<Vec<Handle>>,
    unloader: DeferredUnloader,
    timer: Mutex<Box<dyn PeriodicTimer>>,
    interval: Duration,
    callback: TimerCallback,
    /// Single-flight guard: overlapping firings are dropped, not queued.
    ticking: AtomicBool,
    ticks: AtomicU64,
}

impl IdleScheduler {
    pub(crate) fn new(
        timer: Box<dyn PeriodicTimer>,
        interval: Duration,
        unload_countdown: u32,
        callback: TimerCallback,
    ) -> Self {
        Self {
            registry: IdleLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            unloader: DeferredUnloader::new(unload_countdown),
            timer: Mutex::new(timer),
            interval,
            callback,
            ticking: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    // ----- Registration -----

    /// Bring the registry entry for `instance` in line with its current idle
    /// flags, then start or stop the timer as needed.  Call whenever the
    /// flags change.
    pub fn update_idle_timers(&self, instance: &PluginInstance) {
        let mut registry = self.registry.lock();
        let flags = instance.needs_idle();
        if flags.is_empty() {
            registry.remove(&instance.handle());
        } else {
            registry.insert(instance.handle(), flags);
        }
        self.reconcile_timer(&registry);
    }

    /// Deferred registration for callers that hold a processing lock.
    pub(crate) fn request(&self, handle: Handle) {
        self.requests.lock().push(handle);
        self.ensure_timer();
    }

    pub(crate) fn schedule_unload(&self, lib: LibraryId) {
        self.unloader.schedule(lib);
        self.ensure_timer();
    }

    // ----- Timer -----

    fn ensure_timer(&self) {
        let mut timer = self.timer.lock();
        if timer.is_running() {
            return;
        }
        match timer.start(self.interval, self.callback.clone()) {
            Ok(()) => log::debug!("Idle timer started ({:?})", self.interval),
            Err(e) => log::error!("Cannot start idle timer: {}", e),
        }
    }

    /// Keep the timer alive exactly while some queue is non-empty.  Called
    /// with the idle lock held; the unload and request queues are locked
    /// across the decision so a concurrent request either is seen here or
    /// restarts the timer afterwards.
    fn reconcile_timer(&self, registry: &IdleRegistry) {
        let unloads = self.unloader.lock();
        let requests = self.requests.lock();
        if registry.is_empty() && unloads.is_empty() && requests.is_empty() {
            let mut timer = self.timer.lock();
            if timer.is_running() {
                timer.stop();
                log::debug!("Idle timer stopped");
            }
        } else {
            self.ensure_timer();
        }
    }

    // ----- Tick -----

    pub(crate) fn tick(&self, host: &Host) {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::trace!("Idle tick already running, dropping this one");
            return;
        }

        let mut notifications: Vec<(NotifyFn, Handle, Notification)> = Vec::new();
        {
            let mut registry = self.registry.lock();

            let requested = std::mem::take(&mut *self.requests.lock());
            for handle in requested {
                registry.entry(handle).or_insert(IdleFlags::NONE);
            }

            let mut remove = Vec::new();
            let handles: Vec<Handle> = registry.keys().copied().collect();
            for handle in handles {
                let Some(instance) = host.acquire(handle) else {
                    log::trace!("Idle entry {} no longer resolves", handle);
                    remove.push(handle);
                    continue;
                };

                if let Some(notification) = instance.service_idle()
                    && let Some(callback) = instance.notify_fn()
                {
                    notifications.push((callback, handle, notification));
                }

                let flags = instance.needs_idle();
                if flags.is_empty() {
                    remove.push(handle);
                } else {
                    registry.insert(handle, flags);
                }
                // Dropping the borrow may destroy the instance, which only
                // queues an unload; it never takes the idle lock.
            }
            for handle in remove {
                registry.remove(&handle);
            }

            for (lib, count) in self.unloader.tick() {
                log::debug!("Unloading library {:#x} ({}x)", lib.as_raw(), count);
                for _ in 0..count {
                    host.libraries().unload(lib);
                }
            }

            self.reconcile_timer(&registry);
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.ticking.store(false, Ordering::Release);

        // Owners may call back into the host, so no lock is held here.
        for (callback, handle, notification) in notifications {
            log::trace!("Notifying owner of {}: {:?}", handle, notification);
            callback(handle, notification);
        }
    }

    /// Stop the timer and release everything still queued.
    pub(crate) fn shutdown(&self, libraries: &dyn NativeLibraries) {
        {
            let mut registry = self.registry.lock();
            registry.clear();
            self.requests.lock().clear();
            let mut timer = self.timer.lock();
            if timer.is_running() {
                timer.stop();
            }
        }
        for (lib, count) in self.unloader.flush_now() {
            for _ in 0..count {
                libraries.unload(lib);
            }
        }
    }

    // ----- Introspection -----

    pub fn is_registered(&self, handle: Handle) -> bool {
        self.registry.lock().contains_key(&handle)
    }

    pub fn registered_flags(&self, handle: Handle) -> Option<IdleFlags> {
        self.registry.lock().get(&handle).copied()
    }

    pub fn registry_len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn timer_running(&self) -> bool {
        self.timer.lock().is_running()
    }

    pub fn unloader(&self) -> &DeferredUnloader {
        &self.unloader
    }

    /// Number of completed (not dropped) ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
