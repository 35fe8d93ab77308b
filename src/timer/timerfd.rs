//! Linux timer backed by a `timerfd` interval timer.
//!
//! The kernel keeps the period, so ticks do not drift with callback run
//! time.  A dedicated thread blocks in `read()` on the descriptor and runs
//! the callback once per wake-up, however many expirations were coalesced.

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{PeriodicTimer, TimerCallback};
use crate::error::{Error, Result};

pub struct TimerFdTimer {
    running: Option<Arc<AtomicBool>>,
}

impl TimerFdTimer {
    pub fn new() -> Self {
        Self { running: None }
    }
}

impl Default for TimerFdTimer {
    fn default() -> Self {
        Self::new()
    }
}

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

fn last_os_error() -> Error {
    Error::Timer(std::io::Error::last_os_error().to_string())
}

impl PeriodicTimer for TimerFdTimer {
    fn start(&mut self, interval: Duration, callback: TimerCallback) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC) };
        if fd < 0 {
            return Err(last_os_error());
        }

        let spec = libc::itimerspec {
            it_interval: to_timespec(interval),
            it_value: to_timespec(interval),
        };
        if unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) } < 0 {
            let err = last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let flag = Arc::new(AtomicBool::new(true));
        let thread_flag = flag.clone();

        let spawned = std::thread::Builder::new()
            .name("vstkeep-idle".into())
            .spawn(move || {
                log::debug!("timerfd idle thread started ({:?})", interval);
                loop {
                    let mut expirations: u64 = 0;
                    let n = unsafe {
                        libc::read(
                            fd,
                            &mut expirations as *mut u64 as *mut c_void,
                            std::mem::size_of::<u64>(),
                        )
                    };
                    if n != std::mem::size_of::<u64>() as isize {
                        if std::io::Error::last_os_error().kind()
                            == std::io::ErrorKind::Interrupted
                        {
                            continue;
                        }
                        log::error!(
                            "timerfd read failed: {}",
                            std::io::Error::last_os_error()
                        );
                        break;
                    }
                    if !thread_flag.load(Ordering::Acquire) {
                        break;
                    }
                    callback();
                }
                unsafe { libc::close(fd) };
                log::debug!("timerfd idle thread stopped");
            });

        if let Err(e) = spawned {
            unsafe { libc::close(fd) };
            return Err(Error::Timer(e.to_string()));
        }

        self.running = Some(flag);
        Ok(())
    }

    fn stop(&mut self) {
        // The thread owns the descriptor and closes it on its next wake-up.
        if let Some(flag) = self.running.take() {
            flag.store(false, Ordering::Release);
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for TimerFdTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_timerfd_fires_and_stops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut timer = TimerFdTimer::new();
        timer
            .start(
                Duration::from_millis(2),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        timer.stop();
        let at_stop = fired.load(Ordering::SeqCst);
        assert!(at_stop >= 3);

        std::thread::sleep(Duration::from_millis(20));
        assert!(fired.load(Ordering::SeqCst) <= at_stop + 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_second_start_is_noop() {
        let mut timer = TimerFdTimer::new();
        let cb: TimerCallback = Arc::new(|| {});
        timer.start(Duration::from_millis(50), cb.clone()).unwrap();
        timer.start(Duration::from_millis(50), cb).unwrap();
        assert!(timer.is_running());
        timer.stop();
        assert!(!timer.is_running());
    }
}
