//! Reference-counted handle table.
//!
//! Instances live in an arena of slots.  Handles the table mints pack the
//! slot index (low 16 bits) with the slot's generation (high 16 bits); the
//! generation is bumped every time a slot is vacated, so a minted handle that
//! outlived its instance never resolves to whatever took the slot next.
//! Generations start at 1, which keeps every minted handle non-zero.
//!
//! Callers may also supply their own handle (any non-zero value, typically
//! an id from the audio engine).  Those are looked up by their full value and
//! only borrow a slot for storage; minting skips values currently in use.
//!
//! The refcount lives here, next to the slot, and is only ever changed by
//! [`HandleTable::ref_handle`] and [`HandleTable::unref`] under the table
//! lock.  The lock is a leaf: nothing calls out while holding it.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::plugin::{PluginInstance, PluginKind};

/// Number of slots, bounded by the 16-bit index of minted handles.
pub const MAX_SLOTS: usize = 1 << 16;

/// Opaque, stable identifier of a hosted plugin instance.  Never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU32);

impl Handle {
    fn minted(index: u16, generation: u16) -> Option<Self> {
        if generation == 0 {
            return None;
        }
        NonZeroU32::new(((generation as u32) << 16) | index as u32).map(Self)
    }

    /// Rebuild a handle from its integer form.  `0` is never a handle.
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u32 {
        self.0.get()
    }

    /// Slot a minted handle points at.
    fn slot_index(self) -> usize {
        (self.0.get() & 0xffff) as usize
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.as_raw())
    }
}

/// Outcome of dropping one reference.
pub enum Unref {
    /// The handle did not resolve.
    Unknown,
    /// Other references remain.
    Released { remaining: u32 },
    /// That was the last reference; the record has left the table and the
    /// caller owns its teardown.
    Destroyed(Arc<PluginInstance>),
}

struct Slot {
    /// Generation for the next minted handle in this slot.
    generation: u16,
    occupant: Option<Occupant>,
}

struct Occupant {
    handle: Handle,
    supplied: bool,
    refcount: u32,
    instance: Arc<PluginInstance>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u16>,
    /// Caller-supplied handles by value.
    supplied: HashMap<u32, u16>,
    live: usize,
}

impl Slots {
    fn locate(&self, handle: Handle) -> Option<usize> {
        if let Some(&index) = self.supplied.get(&handle.as_raw()) {
            return Some(index as usize);
        }
        let index = handle.slot_index();
        let occupant = self.slots.get(index)?.occupant.as_ref()?;
        (!occupant.supplied && occupant.handle == handle).then_some(index)
    }

    fn occupant(&self, handle: Handle) -> Option<&Occupant> {
        let index = self.locate(handle)?;
        self.slots[index].occupant.as_ref()
    }

    fn occupant_mut(&mut self, handle: Handle) -> Option<&mut Occupant> {
        let index = self.locate(handle)?;
        self.slots[index].occupant.as_mut()
    }

    fn free_slot(&mut self, capacity: usize) -> Option<u16> {
        match self.free.pop() {
            Some(index) => Some(index),
            None if self.slots.len() < capacity => {
                self.slots.push(Slot {
                    generation: 1,
                    occupant: None,
                });
                Some((self.slots.len() - 1) as u16)
            }
            None => None,
        }
    }

    fn bump_generation(slot: &mut Slot) {
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
    }

    /// Pick a vacant slot and a fresh handle for it that does not collide
    /// with a caller-supplied one.
    fn mint(&mut self, capacity: usize) -> Option<(u16, Handle)> {
        let index = self.free_slot(capacity)?;
        for _ in 0..=u16::MAX {
            let slot = &mut self.slots[index as usize];
            let handle = Handle::minted(index, slot.generation)?;
            if !self.supplied.contains_key(&handle.as_raw()) {
                return Some((index, handle));
            }
            Self::bump_generation(slot);
        }
        self.free.push(index);
        None
    }

    /// Find storage for a caller-supplied handle.  `None` when the value is
    /// already live or the table is full.
    fn claim(&mut self, handle: Handle, capacity: usize) -> Option<u16> {
        if self.locate(handle).is_some() {
            return None;
        }
        let index = self.free_slot(capacity)?;
        self.supplied.insert(handle.as_raw(), index);
        Some(index)
    }

    fn vacate(&mut self, handle: Handle) -> Option<Arc<PluginInstance>> {
        let index = self.locate(handle)?;
        let slot = &mut self.slots[index];
        let occupant = slot.occupant.take()?;
        Self::bump_generation(slot);
        if occupant.supplied {
            self.supplied.remove(&handle.as_raw());
        }
        self.free.push(index as u16);
        self.live -= 1;
        Some(occupant.instance)
    }
}

pub struct HandleTable {
    inner: Mutex<Slots>,
    capacity: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_capacity_limit(MAX_SLOTS)
    }

    pub(crate) fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Slots::default()),
            capacity: capacity.min(MAX_SLOTS),
        }
    }

    /// Create a record with a refcount of 1.  With `requested` the record is
    /// placed under exactly that handle, otherwise a fresh one is minted.
    /// `None` when the table is full or the requested handle is live.
    pub fn create(
        &self,
        kind: PluginKind,
        requested: Option<Handle>,
    ) -> Option<Arc<PluginInstance>> {
        let mut inner = self.inner.lock();
        let (index, handle, supplied) = match requested {
            Some(handle) => (inner.claim(handle, self.capacity)?, handle, true),
            None => {
                let (index, handle) = inner.mint(self.capacity)?;
                (index, handle, false)
            }
        };

        let instance = Arc::new(PluginInstance::new(handle, kind));
        inner.slots[index as usize].occupant = Some(Occupant {
            handle,
            supplied,
            refcount: 1,
            instance: instance.clone(),
        });
        inner.live += 1;
        Some(instance)
    }

    /// Borrow: look the handle up and take a reference on it.
    pub fn ref_handle(&self, handle: Handle) -> Option<Arc<PluginInstance>> {
        let mut inner = self.inner.lock();
        let occupant = inner.occupant_mut(handle)?;
        occupant.refcount += 1;
        Some(occupant.instance.clone())
    }

    /// Drop one reference.  At zero the record is removed from the table and
    /// handed back for teardown.
    pub fn unref(&self, handle: Handle) -> Unref {
        let mut inner = self.inner.lock();
        let Some(occupant) = inner.occupant_mut(handle) else {
            return Unref::Unknown;
        };
        occupant.refcount -= 1;
        if occupant.refcount > 0 {
            return Unref::Released {
                remaining: occupant.refcount,
            };
        }
        match inner.vacate(handle) {
            Some(instance) => Unref::Destroyed(instance),
            None => Unref::Unknown,
        }
    }

    /// Look up without taking a reference.  For callers that already run
    /// inside a borrow of the same instance (plugin callbacks) and must not
    /// be the ones to drop the last reference.
    pub(crate) fn peek(&self, handle: Handle) -> Option<Arc<PluginInstance>> {
        self.inner.lock().occupant(handle).map(|o| o.instance.clone())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.inner.lock().occupant(handle).is_some()
    }

    pub fn refcount(&self, handle: Handle) -> Option<u32> {
        self.inner.lock().occupant(handle).map(|o| o.refcount)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live handles, in slot order.
    pub fn handles(&self) -> Vec<Handle> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter_map(|slot| slot.occupant.as_ref().map(|o| o.handle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destroyed(result: Unref) -> bool {
        matches!(result, Unref::Destroyed(_))
    }

    fn raw(value: u32) -> Handle {
        Handle::from_raw(value).unwrap()
    }

    #[test]
    fn test_any_nonzero_value_is_a_handle() {
        assert!(Handle::from_raw(0).is_none());
        let h = raw(0x1234);
        assert_eq!(h.as_raw(), 0x1234);
        assert_eq!(h.to_string(), "0x00001234");
    }

    #[test]
    fn test_refcount_lifecycle() {
        let table = HandleTable::new();
        let instance = table.create(PluginKind::Effect, None).unwrap();
        let h = instance.handle();
        assert_eq!(instance.kind(), PluginKind::Effect);
        assert_eq!(table.refcount(h), Some(1));

        assert!(table.ref_handle(h).is_some());
        assert_eq!(table.refcount(h), Some(2));

        assert!(matches!(table.unref(h), Unref::Released { remaining: 1 }));
        assert!(table.contains(h));
        assert!(destroyed(table.unref(h)));
        assert!(!table.contains(h));
        assert!(table.is_empty());

        assert!(table.ref_handle(h).is_none());
        assert!(matches!(table.unref(h), Unref::Unknown));
    }

    #[test]
    fn test_reused_slot_does_not_resolve_stale_handle() {
        let table = HandleTable::new();
        let old = table.create(PluginKind::Effect, None).unwrap().handle();
        assert!(destroyed(table.unref(old)));

        let new = table.create(PluginKind::Instrument, None).unwrap().handle();
        assert_ne!(new, old);
        assert!(table.ref_handle(old).is_none());
        assert_eq!(table.refcount(new), Some(1));
    }

    #[test]
    fn test_stale_minted_handle_misses_supplied_occupant() {
        let table = HandleTable::new();
        let minted = table.create(PluginKind::Effect, None).unwrap().handle();
        assert!(destroyed(table.unref(minted)));

        // The supplied handle takes over the vacated slot.
        let supplied = raw(0x00c0_ffee);
        assert!(table.create(PluginKind::Effect, Some(supplied)).is_some());
        assert!(table.ref_handle(minted).is_none());
        assert!(table.contains(supplied));
    }

    #[test]
    fn test_caller_supplied_handle() {
        let table = HandleTable::new();
        let wanted = raw(0x8000_0005);
        let instance = table.create(PluginKind::Instrument, Some(wanted)).unwrap();
        assert_eq!(instance.handle(), wanted);

        // Already live.
        assert!(table.create(PluginKind::Instrument, Some(wanted)).is_none());

        let minted: Vec<Handle> = (0..6)
            .map(|_| table.create(PluginKind::Effect, None).unwrap().handle())
            .collect();
        assert!(!minted.contains(&wanted));
        assert_eq!(table.len(), 7);
    }

    #[test]
    fn test_supplied_handle_can_be_supplied_again_after_release() {
        let table = HandleTable::new();
        let h = raw(0x0001_0005);
        assert!(table.create(PluginKind::Effect, Some(h)).is_some());
        assert!(destroyed(table.unref(h)));
        assert!(!table.contains(h));

        assert!(table.create(PluginKind::Effect, Some(h)).is_some());
        assert_eq!(table.refcount(h), Some(1));
    }

    #[test]
    fn test_supplied_handles_sharing_low_bits_coexist() {
        let table = HandleTable::new();
        let a = raw(0x8000_0001);
        let b = raw(0x8001_0001);
        let ia = table.create(PluginKind::Effect, Some(a)).unwrap();
        let ib = table.create(PluginKind::Instrument, Some(b)).unwrap();
        assert!(!Arc::ptr_eq(&ia, &ib));

        assert_eq!(table.peek(a).unwrap().kind(), PluginKind::Effect);
        assert_eq!(table.peek(b).unwrap().kind(), PluginKind::Instrument);
        assert!(destroyed(table.unref(a)));
        assert!(table.contains(b));
        assert_eq!(table.refcount(b), Some(1));
    }

    #[test]
    fn test_small_supplied_values_are_accepted() {
        let table = HandleTable::new();
        let h = raw(0x1234);
        assert!(table.create(PluginKind::Effect, Some(h)).is_some());
        assert!(table.contains(h));
        assert!(destroyed(table.unref(h)));
    }

    #[test]
    fn test_supplied_value_collides_with_live_minted_handle() {
        let table = HandleTable::new();
        let minted = table.create(PluginKind::Effect, None).unwrap().handle();
        assert!(table.create(PluginKind::Effect, Some(minted)).is_none());
        assert_eq!(table.refcount(minted), Some(1));
    }

    #[test]
    fn test_minting_skips_live_supplied_values() {
        let table = HandleTable::new();
        // Slot 0 holds the supplied handle; the first minted handle would
        // otherwise be index 1, generation 1.
        let supplied = raw(0x0001_0001);
        assert!(table.create(PluginKind::Effect, Some(supplied)).is_some());

        let minted = table.create(PluginKind::Effect, None).unwrap().handle();
        assert_ne!(minted, supplied);
        assert_eq!(minted.as_raw(), 0x0002_0001);
        assert_eq!(table.refcount(supplied), Some(1));
        assert_eq!(table.refcount(minted), Some(1));
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let table = HandleTable::with_capacity_limit(2);
        let a = table.create(PluginKind::Effect, None).unwrap().handle();
        let _b = table.create(PluginKind::Effect, None).unwrap();
        assert!(table.create(PluginKind::Effect, None).is_none());
        assert!(table.create(PluginKind::Effect, Some(raw(0x0001_0009))).is_none());

        assert!(destroyed(table.unref(a)));
        assert!(table.create(PluginKind::Effect, None).is_some());
    }

    #[test]
    fn test_concurrent_ref_unref_keeps_count() {
        let table = Arc::new(HandleTable::new());
        let h = table.create(PluginKind::Effect, None).unwrap().handle();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(table.ref_handle(h).is_some());
                        assert!(matches!(table.unref(h), Unref::Released { .. }));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(table.refcount(h), Some(1));
        assert!(destroyed(table.unref(h)));
    }

    #[test]
    fn test_handles_lists_live_records() {
        let table = HandleTable::new();
        let a = table.create(PluginKind::Effect, None).unwrap().handle();
        let b = table.create(PluginKind::Effect, None).unwrap().handle();
        let c = raw(0x42);
        table.create(PluginKind::Effect, Some(c));
        assert!(destroyed(table.unref(a)));
        assert_eq!(table.handles(), vec![b, c]);
    }
}
