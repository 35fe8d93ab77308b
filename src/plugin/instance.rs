//! The per-plugin record kept in the handle table.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use super::library::LibraryId;
use super::types::*;
use super::Plugin;
use crate::host::Handle;
use crate::sync::ProcessingLock;

/// Snapshot value for parameters that have not been observed yet.  Compared
/// bitwise, so the first real value always reads as a change.
const UNSEEN: f32 = f32::NAN;

/// One hosted plugin.
///
/// The record is created empty by the handle table and a plugin object is
/// attached once the format backend has opened it.  All access to the
/// plugin object and the parameter snapshot goes through the processing
/// lock; the idle flags are atomic so the owner can flip them without it.
pub struct PluginInstance {
    handle: Handle,
    kind: PluginKind,
    needs_idle: AtomicU8,
    bypassed: AtomicBool,
    processing: ProcessingLock<ProcessingState>,
    notify: Mutex<Option<NotifyFn>>,
}

struct ProcessingState {
    plugin: Option<Box<dyn Plugin>>,
    library: Option<LibraryId>,
    /// Last observed parameter values.  Sized from the plugin's count at
    /// every check because some plugins change it after load.
    snapshot: Vec<f32>,
}

impl PluginInstance {
    pub(crate) fn new(handle: Handle, kind: PluginKind) -> Self {
        Self {
            handle,
            kind,
            needs_idle: AtomicU8::new(0),
            bypassed: AtomicBool::new(false),
            processing: ProcessingLock::new(ProcessingState {
                plugin: None,
                library: None,
                snapshot: Vec::new(),
            }),
            notify: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    // ----- Plugin object -----

    /// Attach the opened plugin and the library it was loaded from.  The
    /// parameter snapshot is seeded with the plugin's current values.
    /// Returns `false` if a plugin is already attached.
    pub fn attach(&self, plugin: Box<dyn Plugin>, library: Option<LibraryId>) -> bool {
        let mut state = self.processing.lock();
        if state.plugin.is_some() {
            return false;
        }
        state.snapshot = (0..plugin.parameter_count())
            .map(|i| plugin.parameter(i))
            .collect();
        state.plugin = Some(plugin);
        state.library = library;
        true
    }

    pub fn is_attached(&self) -> bool {
        self.processing.lock().plugin.is_some()
    }

    pub fn library(&self) -> Option<LibraryId> {
        self.processing.lock().library
    }

    /// Close the plugin and hand back its library for deferred unload.
    pub(crate) fn teardown(&self) -> Option<LibraryId> {
        let mut state = self.processing.lock();
        drop(state.plugin.take());
        state.snapshot.clear();
        self.needs_idle.store(0, Ordering::Release);
        *self.notify.lock() = None;
        state.library.take()
    }

    // ----- Idle flags -----

    pub fn needs_idle(&self) -> IdleFlags {
        IdleFlags::from_bits_truncate(self.needs_idle.load(Ordering::Acquire))
    }

    pub(crate) fn set_needs_idle(&self, flags: IdleFlags) {
        self.needs_idle.store(flags.bits(), Ordering::Release);
    }

    pub(crate) fn insert_needs_idle(&self, flags: IdleFlags) {
        self.needs_idle.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove_needs_idle(&self, flags: IdleFlags) {
        self.needs_idle.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    // ----- Owner callback -----

    pub(crate) fn set_notify(&self, callback: Option<NotifyFn>) {
        *self.notify.lock() = callback;
    }

    pub(crate) fn notify_fn(&self) -> Option<NotifyFn> {
        self.notify.lock().clone()
    }

    // ----- Processing -----

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypassed.store(bypass, Ordering::Relaxed);
    }

    /// Run one block through the plugin.  Blocks while the idle thread is
    /// servicing this instance.
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let mut state = self.processing.lock();
        match state.plugin.as_mut() {
            Some(plugin) if !self.is_bypassed() => plugin.process(inputs, outputs, frames),
            _ => pass_through(inputs, outputs, frames),
        }
    }

    // ----- Parameters -----

    pub fn parameter_count(&self) -> usize {
        let state = self.processing.lock();
        state.plugin.as_ref().map_or(0, |p| p.parameter_count())
    }

    pub fn parameter(&self, index: usize) -> Option<f32> {
        let state = self.processing.lock();
        let plugin = state.plugin.as_ref()?;
        (index < plugin.parameter_count()).then(|| plugin.parameter(index))
    }

    /// Host-initiated parameter change.  The snapshot is updated as well so
    /// the change is not reported back as drift.
    pub fn set_parameter(&self, index: usize, value: f32) -> bool {
        let mut state = self.processing.lock();
        let ProcessingState {
            plugin, snapshot, ..
        } = &mut *state;
        let Some(plugin) = plugin.as_mut() else {
            return false;
        };
        if index >= plugin.parameter_count() {
            return false;
        }
        plugin.set_parameter(index, value);
        if let Some(last) = snapshot.get_mut(index) {
            *last = plugin.parameter(index);
        }
        true
    }

    /// Copy of the last observed parameter values.
    pub fn snapshot(&self) -> Vec<f32> {
        self.processing.lock().snapshot.clone()
    }

    // ----- Idle service -----

    /// One idle visit: legacy idle and/or editor idle, then drift detection.
    /// Returns the notification to deliver to the owner, if any.
    pub(crate) fn service_idle(&self) -> Option<Notification> {
        if self.needs_idle().contains(IdleFlags::OUTSIDE_EDIT) {
            let mut state = self.processing.lock();
            let still_needed = state.plugin.as_mut().is_some_and(|p| p.idle());
            if !still_needed {
                self.remove_needs_idle(IdleFlags::OUTSIDE_EDIT);
            }
        }

        if self.needs_idle().contains(IdleFlags::EDITOR) {
            {
                let mut state = self.processing.lock();
                if let Some(plugin) = state.plugin.as_mut() {
                    plugin.editor_idle();
                }
            }
            return self.check_parameter_drift();
        }

        None
    }

    fn check_parameter_drift(&self) -> Option<Notification> {
        let mut state = self.processing.lock();
        let ProcessingState {
            plugin, snapshot, ..
        } = &mut *state;
        let plugin = plugin.as_deref()?;

        let old_count = snapshot.len();
        let new_count = plugin.parameter_count();
        snapshot.resize(new_count, UNSEEN);

        let mut changed = false;
        for (index, last) in snapshot.iter_mut().enumerate() {
            let value = plugin.parameter(index);
            if value.to_bits() != last.to_bits() {
                *last = value;
                changed = true;
            }
        }

        changed.then_some(Notification::ParamsChanged {
            old_count,
            new_count,
        })
    }
}

fn pass_through(inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
    for (i, output) in outputs.iter_mut().enumerate() {
        if i < inputs.len() {
            let n = output.len().min(inputs[i].len()).min(frames);
            output[..n].copy_from_slice(&inputs[i][..n]);
        } else {
            for s in output.iter_mut().take(frames) {
                *s = 0.0;
            }
        }
    }
}
