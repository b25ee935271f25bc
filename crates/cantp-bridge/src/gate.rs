//! Synchronization gate for the sender state machine
//!
//! A binary signal: [`GateNotifier::release`] raises it (collapsing repeated
//! releases into one) and [`GateWaiter::acquire`] consumes it, blocking up to
//! a timeout. Releasing is safe from the timer-service thread and from
//! transmit-completion paths while the sender task waits.
//!
//! The gate supports exactly one waiter. [`gate`] hands out a single
//! non-cloneable [`GateWaiter`] whose `acquire` takes `&mut self`, so a
//! second concurrent waiter cannot be expressed.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::wait::Wait;

#[derive(Debug, Default)]
struct GateShared {
    signalled: Mutex<bool>,
    cv: Condvar,
}

/// Create a gate, returning its notifier and its only waiter
pub fn gate() -> (GateNotifier, GateWaiter) {
    let shared = Arc::new(GateShared::default());
    (
        GateNotifier {
            shared: shared.clone(),
        },
        GateWaiter { shared },
    )
}

/// Release side of the gate; cheap to clone
#[derive(Debug, Clone)]
pub struct GateNotifier {
    shared: Arc<GateShared>,
}

impl GateNotifier {
    /// Raise the signal and wake the waiter, if any
    pub fn release(&self) {
        let mut signalled = self.shared.signalled.lock();
        *signalled = true;
        self.shared.cv.notify_one();
    }

    /// Whether a release is pending and not yet consumed
    pub fn is_pending(&self) -> bool {
        *self.shared.signalled.lock()
    }
}

/// Acquire side of the gate
#[derive(Debug)]
pub struct GateWaiter {
    shared: Arc<GateShared>,
}

impl GateWaiter {
    /// Wait for the signal and consume it
    ///
    /// Returns `false` if no release happened within `timeout`. A release
    /// that happened before the call is consumed immediately.
    pub fn acquire(&mut self, timeout: Wait) -> bool {
        let deadline = timeout.deadline();
        let mut signalled = self.shared.signalled.lock();

        while !*signalled {
            match (timeout, deadline) {
                (Wait::For(_), Some(deadline)) => {
                    if self.shared.cv.wait_until(&mut signalled, deadline).timed_out() {
                        break;
                    }
                }
                _ => self.shared.cv.wait(&mut signalled),
            }
        }

        let obtained = *signalled;
        *signalled = false;
        obtained
    }

    /// Whether `notifier` releases this waiter's gate
    pub fn is_paired_with(&self, notifier: &GateNotifier) -> bool {
        Arc::ptr_eq(&self.shared, &notifier.shared)
    }

    /// A notifier bound to this waiter's gate
    pub fn notifier(&self) -> GateNotifier {
        GateNotifier {
            shared: self.shared.clone(),
        }
    }
}
