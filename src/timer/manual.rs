//! Timer fired by the embedding application.
//!
//! Hosts that already run a UI event loop can drive idle from it by calling
//! [`ManualTimer::fire`] whenever the timer is armed.  Clones share state, so
//! the host can own one clone while the event loop keeps another.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{PeriodicTimer, TimerCallback};
use crate::error::Result;

#[derive(Clone, Default)]
pub struct ManualTimer {
    shared: Arc<ManualShared>,
}

#[derive(Default)]
struct ManualShared {
    armed: Mutex<Option<(Duration, TimerCallback)>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the callback once if the timer is armed.  Returns whether it ran.
    pub fn fire(&self) -> bool {
        // Clone out so the callback may stop this timer.
        let callback = self.shared.armed.lock().as_ref().map(|(_, cb)| cb.clone());
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.lock().is_some()
    }

    /// The interval requested by the last `start`, while armed.
    pub fn interval(&self) -> Option<Duration> {
        self.shared.armed.lock().as_ref().map(|(interval, _)| *interval)
    }

    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }
}

impl PeriodicTimer for ManualTimer {
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()> {
        let mut armed = self.shared.armed.lock();
        if armed.is_none() {
            *armed = Some((interval, callback));
            self.shared.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.shared.armed.lock().take().is_some() {
            self.shared.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.is_armed()
    }
}
