//! One-shot pacing timer
//!
//! [`OneShotTimer`] owns a timer-service thread that sleeps on a monotonic
//! deadline and runs the bound callback when it expires. The callback runs
//! on that service thread, outside the sender task, and must only do brief
//! non-blocking work (update state, release the gate).
//!
//! The transport context keeps a cloneable [`TimerHandle`]; once the owning
//! timer is shut down every handle reports [`TimerError::InvalidHandle`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::TimerError;

/// Expiry callback; captures whatever context the caller needs
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
    callback: Option<TimerCallback>,
}

struct TimerShared {
    name: String,
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Owner of a one-shot timer and its service thread
pub struct OneShotTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    /// Create a disarmed timer with no callback bound
    pub fn new(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared {
            name: name.to_string(),
            state: Mutex::new(TimerState::default()),
            cv: Condvar::new(),
        });

        let service = shared.clone();
        let thread = thread::Builder::new()
            .name(format!("timer-{}", name))
            .spawn(move || service_loop(service))?;

        debug!(timer = name, "Created one-shot timer");

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Bind the expiry callback, replacing any previous one
    pub fn bind(&self, callback: TimerCallback) {
        self.shared.state.lock().callback = Some(callback);
    }

    /// A handle for arming and disarming this timer
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stop the service thread; outstanding handles become invalid
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
            state.callback = None;
            self.shared.cv.notify_all();
        }

        if let Some(thread) = self.thread.take() {
            // The last owner may be dropped from inside the callback
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!(timer = %self.shared.name, "Timer service thread panicked");
            }
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

/// Cloneable arming handle held by the transport context
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    /// Arm the timer to fire once after `duration`
    ///
    /// Fails with [`TimerError::AlreadyRunning`] if the previous arming has
    /// neither fired nor been stopped. Errors are never retried here.
    pub fn start_once(&self, duration: Duration) -> Result<(), TimerError> {
        let mut state = self.shared.state.lock();

        if state.shutdown {
            warn!(timer = %self.shared.name, "Start on invalid timer handle");
            return Err(TimerError::InvalidHandle);
        }
        if state.deadline.is_some() {
            warn!(timer = %self.shared.name, "Timer is already running");
            return Err(TimerError::AlreadyRunning);
        }

        let deadline = Instant::now()
            .checked_add(duration)
            .ok_or(TimerError::InvalidHandle)?;

        trace!(timer = %self.shared.name, duration_us = duration.as_micros() as u64, "Starting timer");
        state.deadline = Some(deadline);
        self.shared.cv.notify_all();
        Ok(())
    }

    /// Disarm the timer; idempotent and safe on a shut-down timer
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if state.deadline.take().is_some() {
            trace!(timer = %self.shared.name, "Timer stopped");
            self.shared.cv.notify_all();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    pub fn is_valid(&self) -> bool {
        !self.shared.state.lock().shutdown
    }
}

fn service_loop(shared: Arc<TimerShared>) {
    let mut state = shared.state.lock();

    loop {
        if state.shutdown {
            break;
        }

        match state.deadline {
            None => shared.cv.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                let callback = state.callback.clone();

                // Run without the lock so the callback may re-arm the timer
                drop(state);
                trace!(timer = %shared.name, "Timer fired");
                if let Some(callback) = callback {
                    callback();
                }
                state = shared.state.lock();
            }
            Some(deadline) => {
                shared.cv.wait_until(&mut state, deadline);
            }
        }
    }

    debug!(timer = %shared.name, "Timer service stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_timer() -> (OneShotTimer, Arc<AtomicUsize>) {
        let timer = OneShotTimer::new("test").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timer.bind(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (timer, fired)
    }

    #[test]
    fn test_fires_once() {
        let (timer, fired) = counting_timer();
        let handle = timer.handle();

        handle.start_once(Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(100));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_already_running() {
        let (timer, _fired) = counting_timer();
        let handle = timer.handle();

        handle.start_once(Duration::from_secs(10)).unwrap();
        assert_eq!(
            handle.start_once(Duration::from_secs(10)),
            Err(TimerError::AlreadyRunning)
        );

        handle.stop();
        assert!(handle.start_once(Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_stop_prevents_firing_and_is_idempotent() {
        let (timer, fired) = counting_timer();
        let handle = timer.handle();

        handle.start_once(Duration::from_millis(30)).unwrap();
        handle.stop();
        handle.stop();
        thread::sleep(Duration::from_millis(80));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_after_shutdown() {
        let (timer, _fired) = counting_timer();
        let handle = timer.handle();
        timer.shutdown();

        assert!(!handle.is_valid());
        assert_eq!(
            handle.start_once(Duration::from_millis(1)),
            Err(TimerError::InvalidHandle)
        );
        handle.stop();
    }

    #[test]
    fn test_callback_can_rearm() {
        let timer = OneShotTimer::new("rearm").unwrap();
        let handle = timer.handle();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let rearm = handle.clone();
        timer.bind(Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                rearm.start_once(Duration::from_millis(5)).unwrap();
            }
        }));

        handle.start_once(Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(120));

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
