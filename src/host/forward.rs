//! Forwarding lists: for each source instance, the set of instances its
//! events should also reach.  Only the lists are kept here; nothing in this
//! module delivers events.  Entries are pruned when instances are destroyed.

use std::collections::HashMap;

use crate::host::Handle;
use crate::sync::ForwardLock;

/// Maximum number of targets per source.
pub const MAX_FORWARD_TARGETS: usize = 128;

#[derive(Default)]
pub struct ForwardTable {
    lists: ForwardLock<HashMap<Handle, Vec<Handle>>>,
}

impl ForwardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or remove `dst` as a forwarding target of `src`.  Returns `false`
    /// when the request cannot be honoured (self-forwarding, full list).
    pub fn set(&self, src: Handle, dst: Handle, enable: bool) -> bool {
        if src == dst {
            return false;
        }
        let mut lists = self.lists.lock();
        if enable {
            let targets = lists.entry(src).or_default();
            if targets.contains(&dst) {
                return true;
            }
            if targets.len() >= MAX_FORWARD_TARGETS {
                log::warn!("Forwarding list of {} is full", src);
                return false;
            }
            targets.push(dst);
        } else if let Some(targets) = lists.get_mut(&src) {
            targets.retain(|&t| t != dst);
            if targets.is_empty() {
                lists.remove(&src);
            }
        }
        true
    }

    pub fn targets(&self, src: Handle) -> Vec<Handle> {
        self.lists.lock().get(&src).cloned().unwrap_or_default()
    }

    /// Forget `handle` both as a source and as a target.
    pub fn remove_handle(&self, handle: Handle) {
        let mut lists = self.lists.lock();
        lists.remove(&handle);
        lists.retain(|_, targets| {
            targets.retain(|&t| t != handle);
            !targets.is_empty()
        });
    }

    /// Drop every handle for which `alive` is false.  Returns how many list
    /// entries were removed.
    pub fn prune(&self, alive: impl Fn(Handle) -> bool) -> usize {
        let mut lists = self.lists.lock();
        let mut removed = 0;
        lists.retain(|&src, targets| {
            let before = targets.len();
            if !alive(src) {
                removed += before;
                return false;
            }
            targets.retain(|&t| alive(t));
            removed += before - targets.len();
            !targets.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(index: u32) -> Handle {
        Handle::from_raw(0x0001_0000 | index).unwrap()
    }

    #[test]
    fn test_set_and_clear_targets() {
        let table = ForwardTable::new();
        assert!(table.set(h(1), h(2), true));
        assert!(table.set(h(1), h(3), true));
        assert!(table.set(h(1), h(2), true));
        assert!(!table.set(h(1), h(1), true));
        assert_eq!(table.targets(h(1)), vec![h(2), h(3)]);

        assert!(table.set(h(1), h(2), false));
        assert_eq!(table.targets(h(1)), vec![h(3)]);
        assert!(table.set(h(1), h(3), false));
        assert!(table.targets(h(1)).is_empty());
    }

    #[test]
    fn test_list_is_bounded() {
        let table = ForwardTable::new();
        for i in 0..MAX_FORWARD_TARGETS as u32 {
            assert!(table.set(h(1000), h(i), true));
        }
        assert!(!table.set(h(1000), h(2000), true));
    }

    #[test]
    fn test_remove_and_prune() {
        let table = ForwardTable::new();
        table.set(h(1), h(2), true);
        table.set(h(1), h(3), true);
        table.set(h(4), h(2), true);

        table.remove_handle(h(2));
        assert_eq!(table.targets(h(1)), vec![h(3)]);
        assert!(table.targets(h(4)).is_empty());

        table.set(h(5), h(1), true);
        assert_eq!(table.prune(|handle| handle != h(3)), 1);
        assert!(table.targets(h(1)).is_empty());
        assert_eq!(table.targets(h(5)), vec![h(1)]);
    }
}
