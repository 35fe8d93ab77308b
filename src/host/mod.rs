//! Plugin host: owns every live instance and the machinery that keeps them
//! serviced.
//!
//! A [`Host`] ties together the handle table, the idle scheduler, the
//! deferred library unloader and the forwarding lists.  It is always held in
//! an `Arc`; the idle timer only keeps a weak reference, so dropping the last
//! strong reference shuts everything down.

pub mod forward;
pub mod handles;
pub mod idle;
pub mod unload;

use std::ops::Deref;
use std::sync::{Arc, Weak};

pub use forward::{ForwardTable, MAX_FORWARD_TARGETS};
pub use handles::{Handle, HandleTable, MAX_SLOTS, Unref};
pub use idle::IdleScheduler;
pub use unload::DeferredUnloader;

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::plugin::{
    IdleFlags, LibraryId, NativeLibraries, NotifyFn, Plugin, PluginInstance, PluginKind,
};
use crate::timer::{PeriodicTimer, TimerCallback};

pub struct Host {
    table: HandleTable,
    idle: IdleScheduler,
    forward: ForwardTable,
    libraries: Arc<dyn NativeLibraries>,
    config: HostConfig,
    me: Weak<Host>,
}

/// A borrowed reference on an instance.  The reference is released when the
/// guard is dropped, which may destroy the instance.
pub struct InstanceRef<'a> {
    host: &'a Host,
    instance: Arc<PluginInstance>,
}

impl Deref for InstanceRef<'_> {
    type Target = PluginInstance;

    fn deref(&self) -> &PluginInstance {
        &self.instance
    }
}

impl Drop for InstanceRef<'_> {
    fn drop(&mut self) {
        self.host.unref_handle(self.instance.handle());
    }
}

impl Host {
    pub fn new(
        config: HostConfig,
        libraries: Arc<dyn NativeLibraries>,
        timer: Box<dyn PeriodicTimer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Host>| {
            let weak = me.clone();
            let callback: TimerCallback = Arc::new(move || {
                if let Some(host) = weak.upgrade() {
                    host.idle_tick();
                }
            });
            log::debug!(
                "Host created (idle every {:?}, unload after {} ticks)",
                config.idle_interval(),
                config.unload_countdown()
            );
            Self {
                table: HandleTable::new(),
                idle: IdleScheduler::new(
                    timer,
                    config.idle_interval(),
                    config.unload_countdown(),
                    callback,
                ),
                forward: ForwardTable::new(),
                libraries,
                config,
                me: me.clone(),
            }
        })
    }

    /// Host with the platform loader and timer.
    #[cfg(unix)]
    pub fn with_defaults(config: HostConfig) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(crate::plugin::library::DlLibraries),
            crate::timer::platform_timer(),
        )
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub(crate) fn weak(&self) -> Weak<Host> {
        self.me.clone()
    }

    pub(crate) fn libraries(&self) -> &dyn NativeLibraries {
        self.libraries.as_ref()
    }

    // ----- Handle table -----

    /// Create an empty instance record with a refcount of 1.
    pub fn create_handle(
        &self,
        kind: PluginKind,
        requested: Option<Handle>,
    ) -> Option<Arc<PluginInstance>> {
        let instance = self.table.create(kind, requested);
        match &instance {
            Some(instance) => log::debug!("Created {} instance {}", kind, instance.handle()),
            None => log::warn!("Cannot create {} instance (requested {:?})", kind, requested),
        }
        instance
    }

    /// Take a reference.  `None` means the instance is already gone.
    pub fn ref_handle(&self, handle: Handle) -> Option<Arc<PluginInstance>> {
        self.table.ref_handle(handle)
    }

    /// Drop a reference.  Returns whether this destroyed the instance.
    pub fn unref_handle(&self, handle: Handle) -> bool {
        match self.table.unref(handle) {
            Unref::Destroyed(instance) => {
                self.destroy(&instance);
                true
            }
            Unref::Released { .. } => false,
            Unref::Unknown => {
                log::trace!("Release of unknown handle {}", handle);
                false
            }
        }
    }

    fn destroy(&self, instance: &PluginInstance) {
        let handle = instance.handle();
        self.forward.remove_handle(handle);
        if let Some(lib) = instance.teardown() {
            self.idle.schedule_unload(lib);
        }
        log::debug!("Destroyed instance {}", handle);
    }

    /// Scoped borrow: `ref_handle` now, `unref_handle` when the guard drops.
    pub fn acquire(&self, handle: Handle) -> Option<InstanceRef<'_>> {
        let instance = self.table.ref_handle(handle)?;
        Some(InstanceRef {
            host: self,
            instance,
        })
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.table.contains(handle)
    }

    pub fn refcount(&self, handle: Handle) -> Option<u32> {
        self.table.refcount(handle)
    }

    pub fn instance_count(&self) -> usize {
        self.table.len()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.table.handles()
    }

    /// Create a record and attach whatever `open` produces.  If `open` fails
    /// the record is released again; `open` is responsible for closing any
    /// library it loaded before failing.
    pub fn open_with<F>(&self, kind: PluginKind, requested: Option<Handle>, open: F) -> Result<Handle>
    where
        F: FnOnce(Handle) -> Result<(Box<dyn Plugin>, Option<LibraryId>)>,
    {
        let instance = self
            .create_handle(kind, requested)
            .ok_or(Error::HandleUnavailable(requested.map_or(0, Handle::as_raw)))?;
        let handle = instance.handle();

        match open(handle) {
            Ok((plugin, library)) => {
                instance.attach(plugin, library);
                Ok(handle)
            }
            Err(e) => {
                log::warn!("Opening instance {} failed: {}", handle, e);
                drop(instance);
                self.unref_handle(handle);
                Err(e)
            }
        }
    }

    // ----- Idle -----

    /// Replace the instance's idle flags and update the scheduler.
    pub fn set_needs_idle(&self, handle: Handle, flags: IdleFlags) -> bool {
        let Some(instance) = self.acquire(handle) else {
            return false;
        };
        instance.set_needs_idle(flags);
        self.idle.update_idle_timers(&instance);
        true
    }

    pub fn insert_needs_idle(&self, handle: Handle, flags: IdleFlags) -> bool {
        let Some(instance) = self.acquire(handle) else {
            return false;
        };
        instance.insert_needs_idle(flags);
        self.idle.update_idle_timers(&instance);
        true
    }

    pub fn clear_needs_idle(&self, handle: Handle, flags: IdleFlags) -> bool {
        let Some(instance) = self.acquire(handle) else {
            return false;
        };
        instance.remove_needs_idle(flags);
        self.idle.update_idle_timers(&instance);
        true
    }

    /// Re-evaluate the registry entry of an instance whose flags were changed
    /// directly.
    pub fn update_idle_timers(&self, instance: &PluginInstance) {
        self.idle.update_idle_timers(instance);
    }

    /// Idle request from inside a plugin dispatch.  The processing lock of
    /// the calling instance is held, so registration is left to the next
    /// tick.
    pub fn request_idle(&self, handle: Handle, flags: IdleFlags) -> bool {
        let Some(instance) = self.table.peek(handle) else {
            return false;
        };
        instance.insert_needs_idle(flags);
        self.idle.request(handle);
        true
    }

    /// Install (or clear) the owner callback for parameter-drift
    /// notifications.
    pub fn set_notify(&self, handle: Handle, callback: Option<NotifyFn>) -> bool {
        let Some(instance) = self.acquire(handle) else {
            return false;
        };
        instance.set_notify(callback);
        true
    }

    /// Run one idle tick now.  Normally called by the timer.
    pub fn idle_tick(&self) {
        self.idle.tick(self);
    }

    pub fn idle(&self) -> &IdleScheduler {
        &self.idle
    }

    pub fn is_idle_registered(&self, handle: Handle) -> bool {
        self.idle.is_registered(handle)
    }

    pub fn timer_running(&self) -> bool {
        self.idle.timer_running()
    }

    pub fn pending_unloads(&self, lib: LibraryId) -> u32 {
        self.idle.unloader().pending(lib)
    }

    // ----- Processing & parameters -----

    /// Audio-thread entry point.  Returns `false` for an unknown handle.
    pub fn process(
        &self,
        handle: Handle,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> bool {
        let Some(instance) = self.acquire(handle) else {
            return false;
        };
        instance.process(inputs, outputs, frames);
        true
    }

    pub fn set_bypass(&self, handle: Handle, bypass: bool) -> bool {
        let Some(instance) = self.acquire(handle) else {
            return false;
        };
        instance.set_bypass(bypass);
        true
    }

    pub fn set_parameter(&self, handle: Handle, index: usize, value: f32) -> bool {
        self.acquire(handle)
            .is_some_and(|instance| instance.set_parameter(index, value))
    }

    pub fn parameter(&self, handle: Handle, index: usize) -> Option<f32> {
        self.acquire(handle)?.parameter(index)
    }

    // ----- Forwarding -----

    /// Enable or disable forwarding from `src` to `dst`.  Enabling requires
    /// both instances to exist.
    pub fn set_forwarding(&self, src: Handle, dst: Handle, enable: bool) -> bool {
        if enable && !(self.table.contains(src) && self.table.contains(dst)) {
            return false;
        }
        self.forward.set(src, dst, enable)
    }

    pub fn forward_targets(&self, src: Handle) -> Vec<Handle> {
        self.forward.targets(src)
    }

    /// Drop forwarding entries that refer to destroyed instances.  Returns
    /// how many were removed.
    pub fn check_forwarding(&self) -> usize {
        let removed = self.forward.prune(|h| self.table.contains(h));
        if removed > 0 {
            log::debug!("Pruned {} stale forwarding entries", removed);
        }
        removed
    }

    // ----- Shutdown -----

    /// Stop the idle timer and unload every library still waiting for its
    /// countdown.  Instances that are still referenced stay alive.
    pub fn shutdown(&self) {
        self.idle.shutdown(self.libraries.as_ref());
        log::debug!("Host shut down ({} instances alive)", self.table.len());
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}
