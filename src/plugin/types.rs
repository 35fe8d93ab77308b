//! Format-agnostic plugin types shared by the host and the format backends.

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::host::Handle;

// ---------------------------------------------------------------------------
// Plugin kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    Effect,
    Instrument,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Effect => "effect",
            Self::Instrument => "instrument",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Idle needs
// ---------------------------------------------------------------------------

/// Which kinds of idle service an instance currently wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IdleFlags(u8);

impl IdleFlags {
    pub const NONE: Self = Self(0);
    /// The editor is open and wants `effEditIdle` plus parameter polling.
    pub const EDITOR: Self = Self(0x01);
    /// The plugin asked for the legacy idle call outside of the editor.
    pub const OUTSIDE_EDIT: Self = Self(0x02);
    pub const ALL: Self = Self(0x03);

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for IdleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for IdleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Owner notifications
// ---------------------------------------------------------------------------

/// Notification code delivered with a parameter-drift notification.
pub const PARAM_CHANGED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The plugin changed one or more parameter values on its own.  The
    /// counts are the snapshot length before and after this tick.
    ParamsChanged { old_count: usize, new_count: usize },
}

impl Notification {
    pub fn code(&self) -> u32 {
        match self {
            Self::ParamsChanged { .. } => PARAM_CHANGED,
        }
    }
}

/// Owner callback, called from the idle thread after the tick has released
/// the idle lock.
pub type NotifyFn = Arc<dyn Fn(Handle, Notification) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_flags_set_operations() {
        let mut flags = IdleFlags::NONE;
        assert!(flags.is_empty());
        flags |= IdleFlags::OUTSIDE_EDIT;
        assert!(flags.contains(IdleFlags::OUTSIDE_EDIT));
        assert!(!flags.contains(IdleFlags::EDITOR));
        flags.insert(IdleFlags::EDITOR);
        assert_eq!(flags, IdleFlags::ALL);
        flags.remove(IdleFlags::OUTSIDE_EDIT);
        assert_eq!(flags, IdleFlags::EDITOR);
        assert_eq!(IdleFlags::from_bits_truncate(0xff), IdleFlags::ALL);
    }

    #[test]
    fn test_notification_code() {
        let n = Notification::ParamsChanged {
            old_count: 4,
            new_count: 4,
        };
        assert_eq!(n.code(), PARAM_CHANGED);
    }
}
