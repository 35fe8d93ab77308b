//! vstkeep - lifecycle management for hosted VST plugin instances.
//!
//! A [`Host`] hands out reference-counted [`Handle`]s to plugin instances,
//! services their idle needs from a low-frequency timer (reporting parameter
//! changes the plugin made on its own) and unloads plugin libraries only
//! after a safety countdown, so code that may still be on another thread's
//! stack is never unmapped underneath it.

pub mod config;
pub mod error;
pub mod host;
pub mod plugin;
pub mod sync;
pub mod timer;
pub mod vst2;

#[cfg(test)]
pub(crate) mod testing;

pub use config::HostConfig;
pub use error::{Error, Result};
pub use host::{Handle, Host, InstanceRef};
pub use plugin::{IdleFlags, LibraryId, NativeLibraries, Notification, NotifyFn, Plugin, PluginKind};
pub use timer::{ManualTimer, PeriodicTimer};
