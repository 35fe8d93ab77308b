//! VST2 backend.
//!
//! Plugins are loaded through the host's [`NativeLibraries`], created via
//! their `VSTPluginMain` entry point and wrapped in a [`Vst2Plugin`] that the
//! host keeps behind the instance's processing lock.  The host callback
//! finds its way back to the instance through a context pointer stored in
//! the effect's reserved host field.
//!
//! [`NativeLibraries`]: crate::plugin::NativeLibraries

pub mod ffi;
mod plugin;

pub use plugin::Vst2Plugin;
