//! Portable timer: a named thread that sleeps for one interval between
//! callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{PeriodicTimer, TimerCallback};
use crate::error::{Error, Result};

pub struct ThreadTimer {
    name: String,
    /// Run flag of the current timer thread.  Each start gets a fresh flag,
    /// so a thread that is still asleep after `stop()` exits on wake-up even
    /// if a new thread has been started in the meantime.
    running: Option<Arc<AtomicBool>>,
}

impl ThreadTimer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: None,
        }
    }
}

impl PeriodicTimer for ThreadTimer {
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let flag = Arc::new(AtomicBool::new(true));
        let thread_flag = flag.clone();

        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                log::debug!("Idle timer thread started ({:?})", interval);
                loop {
                    std::thread::sleep(interval);
                    if !thread_flag.load(Ordering::Acquire) {
                        break;
                    }
                    callback();
                }
                log::debug!("Idle timer thread stopped");
            })
            .map_err(|e| Error::Timer(e.to_string()))?;

        self.running = Some(flag);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(flag) = self.running.take() {
            flag.store(false, Ordering::Release);
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
