//! Shared transport context
//!
//! One [`TransportContext`] is created at startup and lives for the whole
//! run. The sender task and the timer callback both read and update it;
//! sender-relevant parameters sit behind a mutex and are only changed while
//! the sender holds the gate.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::can_io::CanIo;
use crate::engine::ReceptionHandler;
use crate::error::EngineError;
use crate::gate::{GateNotifier, GateWaiter};
use crate::timer::TimerHandle;
use crate::wait::Wait;

/// Flow-control parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportParams {
    /// Separation time minimum between consecutive frames
    pub st_min: Duration,
    /// Consecutive frames per flow-control block, 0 for unlimited
    pub block_size: u8,
    /// Wait-frame timeout
    pub wft_timeout: Wait,
}

impl TransportParams {
    /// Parameters advertised when receiving: no separation time, no blocks
    pub fn receiver() -> Self {
        Self {
            st_min: Duration::ZERO,
            block_size: 0,
            wft_timeout: Wait::Forever,
        }
    }
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            st_min: Duration::from_micros(127_000),
            block_size: 0,
            wft_timeout: Wait::Forever,
        }
    }
}

/// Platform delay behaviour for protocol pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Always wait this long, whatever was requested
    Fixed(Duration),
    /// Wait exactly the requested duration
    Requested,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::Fixed(Duration::from_millis(100))
    }
}

/// Context shared by the receive path, the sender task and the timer
pub struct TransportContext {
    sender: Mutex<TransportParams>,
    receiver: TransportParams,
    can: Arc<dyn CanIo>,
    timer: TimerHandle,
    gate: GateNotifier,
    handler: Arc<dyn ReceptionHandler>,
    pacing: Pacing,
}

impl TransportContext {
    pub fn new(
        sender: TransportParams,
        can: Arc<dyn CanIo>,
        timer: TimerHandle,
        gate: GateNotifier,
        handler: Arc<dyn ReceptionHandler>,
        pacing: Pacing,
    ) -> Self {
        Self {
            sender: Mutex::new(sender),
            receiver: TransportParams::receiver(),
            can,
            timer,
            gate,
            handler,
            pacing,
        }
    }

    /// Current sender parameters
    pub fn params(&self) -> TransportParams {
        *self.sender.lock()
    }

    /// Parameters advertised in our own flow-control frames
    pub fn receiver_params(&self) -> TransportParams {
        self.receiver
    }

    /// Mutate the sender parameters
    ///
    /// Only the holder of this context's [`GateWaiter`] (the sender task)
    /// may change them; a waiter from another gate is refused.
    pub fn update_params<F>(&self, gate: &mut GateWaiter, update: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut TransportParams),
    {
        if !gate.is_paired_with(&self.gate) {
            return Err(EngineError::ForeignGate);
        }

        let mut params = self.sender.lock();
        update(&mut *params);
        trace!(params = ?*params, "Sender parameters updated");
        Ok(())
    }

    pub fn can(&self) -> &dyn CanIo {
        self.can.as_ref()
    }

    pub fn timer(&self) -> &TimerHandle {
        &self.timer
    }

    pub fn gate(&self) -> &GateNotifier {
        &self.gate
    }

    /// Application callbacks behind the engine
    pub fn handler(&self) -> &dyn ReceptionHandler {
        self.handler.as_ref()
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Platform delay routine used for protocol timing
    ///
    /// With [`Pacing::Fixed`] the requested duration is ignored.
    pub fn pace(&self, requested: Duration) -> Duration {
        let actual = match self.pacing {
            Pacing::Fixed(fixed) => {
                if fixed != requested {
                    warn!(
                        requested_us = requested.as_micros() as u64,
                        actual_us = fixed.as_micros() as u64,
                        "Pacing delay differs from requested duration"
                    );
                }
                fixed
            }
            Pacing::Requested => requested,
        };

        thread::sleep(actual);
        actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RxBuffer;
    use crate::can_io::MockCanBus;
    use crate::engine::{Delivery, SendResult};
    use crate::frame::IdWidth;
    use crate::gate::gate;
    use crate::timer::OneShotTimer;

    struct NullHandler;

    impl ReceptionHandler for NullHandler {
        fn on_message(&self, _: u32, _: IdWidth, _: &[u8]) -> Delivery {
            Delivery::Dropped
        }

        fn on_first_frame(&self, _: u32, _: IdWidth, _: usize) -> Option<RxBuffer> {
            None
        }

        fn on_send_result(&self, _: SendResult) {}
    }

    fn context(pacing: Pacing) -> (TransportContext, GateWaiter, OneShotTimer) {
        let timer = OneShotTimer::new("ctx").unwrap();
        let (notifier, waiter) = gate();
        let ctx = TransportContext::new(
            TransportParams::default(),
            Arc::new(MockCanBus::new()),
            timer.handle(),
            notifier,
            Arc::new(NullHandler),
            pacing,
        );
        (ctx, waiter, timer)
    }

    #[test]
    fn test_receiver_params_are_unpaced() {
        let (ctx, _waiter, _timer) = context(Pacing::Requested);
        let params = ctx.receiver_params();
        assert_eq!(params.st_min, Duration::ZERO);
        assert_eq!(params.block_size, 0);
    }

    #[test]
    fn test_update_params() {
        let (ctx, mut waiter, _timer) = context(Pacing::Requested);
        ctx.update_params(&mut waiter, |p| {
            p.block_size = 8;
            p.st_min = Duration::from_millis(5);
        })
        .unwrap();

        let params = ctx.params();
        assert_eq!(params.block_size, 8);
        assert_eq!(params.st_min, Duration::from_millis(5));
    }

    #[test]
    fn test_update_params_requires_own_waiter() {
        let (ctx, _waiter, _timer) = context(Pacing::Requested);
        let (_other_notifier, mut other_waiter) = gate();

        let result = ctx.update_params(&mut other_waiter, |p| p.block_size = 8);

        assert_eq!(result, Err(EngineError::ForeignGate));
        assert_eq!(ctx.params().block_size, 0);
    }

    #[test]
    fn test_fixed_pacing_ignores_request() {
        let (ctx, _waiter, _timer) = context(Pacing::Fixed(Duration::from_millis(5)));
        assert_eq!(ctx.pace(Duration::from_millis(1)), Duration::from_millis(5));
    }

    #[test]
    fn test_requested_pacing() {
        let (ctx, _waiter, _timer) = context(Pacing::Requested);
        assert_eq!(ctx.pace(Duration::from_millis(2)), Duration::from_millis(2));
    }
}
