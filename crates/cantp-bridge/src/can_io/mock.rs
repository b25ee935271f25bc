//! In-memory CAN bus for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::CanIo;
use crate::error::CanIoError;
use crate::frame::CanFrame;
use crate::wait::Wait;

#[derive(Default)]
struct BusState {
    rx: VecDeque<Result<CanFrame, CanIoError>>,
    transmitted: Vec<CanFrame>,
    /// Transmit-complete events not yet consumed by a confirmed send
    completions: usize,
}

/// Mock CAN bus
///
/// Frames injected with [`MockCanBus::inject`] are handed out by `receive`;
/// everything transmitted is recorded. Confirmed transmits complete on their
/// own while `auto_confirm` is set, otherwise they wait for
/// [`MockCanBus::signal_tx_complete`].
pub struct MockCanBus {
    state: Mutex<BusState>,
    rx_cv: Condvar,
    tx_cv: Condvar,
    auto_confirm: AtomicBool,
    fail_transmit: AtomicBool,
}

impl Default for MockCanBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCanBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            rx_cv: Condvar::new(),
            tx_cv: Condvar::new(),
            auto_confirm: AtomicBool::new(true),
            fail_transmit: AtomicBool::new(false),
        }
    }

    /// Queue a frame for the next `receive`
    pub fn inject(&self, frame: CanFrame) {
        let mut state = self.state.lock();
        state.rx.push_back(Ok(frame));
        self.rx_cv.notify_all();
    }

    /// Queue a driver error for the next `receive`
    pub fn inject_error(&self, error: CanIoError) {
        let mut state = self.state.lock();
        state.rx.push_back(Err(error));
        self.rx_cv.notify_all();
    }

    /// Frames transmitted so far, oldest first
    pub fn transmitted(&self) -> Vec<CanFrame> {
        self.state.lock().transmitted.clone()
    }

    pub fn clear_transmitted(&self) {
        self.state.lock().transmitted.clear();
    }

    pub fn set_auto_confirm(&self, enabled: bool) {
        self.auto_confirm.store(enabled, Ordering::SeqCst);
    }

    /// Make every transmit fail with a driver error
    pub fn set_fail_transmit(&self, fail: bool) {
        self.fail_transmit.store(fail, Ordering::SeqCst);
    }

    /// Raise one transmit-complete event
    pub fn signal_tx_complete(&self) {
        let mut state = self.state.lock();
        state.completions += 1;
        self.tx_cv.notify_all();
    }

    /// Block until at least `count` frames were transmitted
    pub fn wait_for_transmit(&self, count: usize, timeout: Duration) -> Vec<CanFrame> {
        let mut state = self.state.lock();
        let _ = self.tx_cv.wait_while_for(
            &mut state,
            |state| state.transmitted.len() < count,
            timeout,
        );
        state.transmitted.clone()
    }

    fn record(&self, frame: &CanFrame) -> Result<(), CanIoError> {
        if self.fail_transmit.load(Ordering::SeqCst) {
            return Err(CanIoError::Driver("bus-off".to_string()));
        }
        trace!(frame = %frame, "Mock transmit");
        let mut state = self.state.lock();
        state.transmitted.push(*frame);
        self.tx_cv.notify_all();
        Ok(())
    }
}

impl CanIo for MockCanBus {
    fn receive(&self, timeout: Wait) -> Result<CanFrame, CanIoError> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();

        loop {
            if let Some(next) = state.rx.pop_front() {
                return next;
            }
            match deadline {
                Some(deadline) => {
                    if self.rx_cv.wait_until(&mut state, deadline).timed_out()
                        && state.rx.is_empty()
                    {
                        return Err(CanIoError::Timeout);
                    }
                }
                None => self.rx_cv.wait(&mut state),
            }
        }
    }

    fn transmit_nonblocking(&self, frame: &CanFrame) -> Result<(), CanIoError> {
        self.record(frame)
    }

    fn transmit_and_confirm(&self, frame: &CanFrame, timeout: Wait) -> Result<(), CanIoError> {
        self.record(frame)?;

        if self.auto_confirm.load(Ordering::SeqCst) {
            return Ok(());
        }

        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        while state.completions == 0 {
            match deadline {
                Some(deadline) => {
                    if self.tx_cv.wait_until(&mut state, deadline).timed_out()
                        && state.completions == 0
                    {
                        return Err(CanIoError::NotConfirmed);
                    }
                }
                None => self.tx_cv.wait(&mut state),
            }
        }
        state.completions -= 1;
        Ok(())
    }
}
