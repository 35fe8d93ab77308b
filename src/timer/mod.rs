//! Low-resolution repeating timer that drives the idle scheduler.
//!
//! Every platform supplies one implementation of [`PeriodicTimer`].  The
//! host only ever asks for "start firing every `interval`" and "stop"; how
//! the ticks are produced (kernel timer, sleeping thread, the embedding
//! application's own event loop) is up to the implementation.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

mod manual;
mod thread;
#[cfg(target_os = "linux")]
mod timerfd;

pub use manual::ManualTimer;
pub use thread::ThreadTimer;
#[cfg(target_os = "linux")]
pub use timerfd::TimerFdTimer;

/// Invoked on every expiry, on whatever thread the timer fires on.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

pub trait PeriodicTimer: Send {
    /// Start firing `callback` every `interval`.  Starting a running timer
    /// is a no-op.
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()>;

    /// Stop firing.  Must be callable from inside the callback itself and
    /// must not wait for an in-flight callback to finish.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// The default timer for the current platform.
pub fn platform_timer() -> Box<dyn PeriodicTimer> {
    #[cfg(target_os = "linux")]
    {
        Box::new(TimerFdTimer::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(ThreadTimer::new("vstkeep-idle"))
    }
}
