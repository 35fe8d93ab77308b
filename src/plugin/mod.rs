//! Format-agnostic plugin abstraction layer.
//!
//! The host never talks to a plugin format directly.  A backend (see
//! `src/vst2/`) wraps its native object in a [`Plugin`] and the host keeps it
//! inside a [`PluginInstance`] record, behind that record's processing lock.

pub mod instance;
pub mod library;
pub mod types;

pub use instance::PluginInstance;
pub use library::{LibraryId, NativeLibraries};
pub use types::*;

/// A live plugin object.
///
/// Every method is called with the owning instance's processing lock held,
/// so implementations never see two calls at once.  Dropping the object
/// closes the plugin; the library it came from stays loaded until the host's
/// deferred unloader releases it.
pub trait Plugin: Send {
    /// Legacy idle call.  Returns `false` once the plugin no longer needs it.
    fn idle(&mut self) -> bool;

    /// Editor idle call, made while the editor is open.
    fn editor_idle(&mut self);

    /// Current number of parameters.  May change after load.
    fn parameter_count(&self) -> usize;

    fn parameter(&self, index: usize) -> f32;

    fn set_parameter(&mut self, index: usize, value: f32);

    /// Process one block of planar audio.
    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize);
}
