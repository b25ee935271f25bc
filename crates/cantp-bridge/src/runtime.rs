//! Task lifecycle
//!
//! Two long-running loops share one [`TransportContext`]:
//! - `rx`: blocking receive on the CAN adapter, frames fed to the engine
//! - `tx`: the engine's sender state machine, pacing itself on the gate
//!
//! Both run on dedicated OS threads since every call they make blocks.
//! The loops only end when the `running` flag is cleared. A loop that ends
//! while the runtime is still running is treated as fatal by
//! [`TransportRuntime::supervise`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::can_io::CanIo;
use crate::config::TransportConfig;
use crate::context::TransportContext;
use crate::engine::{ReceptionHandler, TransportEngine};
use crate::error::{CanIoError, RuntimeError};
use crate::frame::Pci;
use crate::gate::{gate, GateWaiter};
use crate::timer::OneShotTimer;
use crate::wait::Wait;

/// Back-off after a driver error on the receive path
const DRIVER_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Back-off after a failed sender step
const SENDER_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Running adapter layer: shared context, pacing timer and both loops
pub struct TransportRuntime {
    ctx: Arc<TransportContext>,
    timer: Option<OneShotTimer>,
    running: Arc<AtomicBool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TransportRuntime {
    /// Build the shared context, wire the timer and start both loops
    pub fn start<E>(
        config: &TransportConfig,
        can: Arc<dyn CanIo>,
        engine: Arc<E>,
        handler: Arc<dyn ReceptionHandler>,
    ) -> Result<Self, RuntimeError>
    where
        E: TransportEngine + 'static,
    {
        let timer = OneShotTimer::new("cantp").map_err(|e| RuntimeError::Spawn {
            name: "timer",
            reason: e.to_string(),
        })?;
        let (notifier, waiter) = gate();

        let ctx = Arc::new(TransportContext::new(
            config.sender_params(),
            can,
            timer.handle(),
            notifier,
            handler,
            config.pacing(),
        ));

        // The callback must not keep the context alive
        let weak = Arc::downgrade(&ctx);
        let hook = engine.clone();
        timer.bind(Arc::new(move || {
            if let Some(ctx) = weak.upgrade() {
                hook.timer_expired(&ctx);
            }
        }));

        let mut runtime = Self {
            ctx,
            timer: Some(timer),
            running: Arc::new(AtomicBool::new(true)),
            tasks: Vec::with_capacity(2),
        };

        let rx_timeout = config.rx_timeout();
        let rx = runtime.spawn("rx", {
            let ctx = runtime.ctx.clone();
            let engine = engine.clone();
            let running = runtime.running.clone();
            move || receive_loop(&ctx, engine.as_ref(), rx_timeout, &running)
        });
        if let Err(e) = rx {
            runtime.stop();
            return Err(e);
        }

        let tx = runtime.spawn("tx", {
            let ctx = runtime.ctx.clone();
            let running = runtime.running.clone();
            move || sender_loop(&ctx, engine.as_ref(), waiter, &running)
        });
        if let Err(e) = tx {
            runtime.stop();
            return Err(e);
        }

        info!(
            st_min_us = config.st_min_us,
            block_size = config.block_size,
            pacing = ?config.pacing,
            "Transport runtime started"
        );

        Ok(runtime)
    }

    fn spawn<F>(&mut self, name: &'static str, body: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("cantp-{}", name))
            .spawn(body)
            .map_err(|e| RuntimeError::Spawn {
                name,
                reason: e.to_string(),
            })?;
        self.tasks.push((name, handle));
        Ok(())
    }

    pub fn context(&self) -> &Arc<TransportContext> {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flag shared with both loops
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Ask both loops to stop and disarm the timer
    ///
    /// The sender is woken through the gate. The receive loop notices on its
    /// next timeout, so with [`Wait::Forever`] it only stops once another
    /// frame arrives.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Stopping transport runtime");
        }
        self.ctx.timer().stop();
        self.ctx.gate().release();
        if let Some(timer) = self.timer.take() {
            timer.shutdown();
        }
    }

    /// Watch both loops until the runtime is stopped
    ///
    /// Returns `Ok(())` once the running flag is cleared. Any loop ending
    /// before that stops the runtime and is reported as an error.
    pub fn supervise(&mut self, poll: Duration) -> Result<(), RuntimeError> {
        loop {
            if !self.is_running() {
                return Ok(());
            }

            if let Some(index) = self.tasks.iter().position(|(_, h)| h.is_finished()) {
                let (name, handle) = self.tasks.swap_remove(index);
                if !self.is_running() {
                    return Ok(());
                }

                self.stop();
                return Err(match handle.join() {
                    Ok(()) => {
                        error!(task = name, "Task terminated unexpectedly");
                        RuntimeError::TaskTerminated(name)
                    }
                    Err(_) => {
                        error!(task = name, "Task panicked");
                        RuntimeError::TaskPanicked(name)
                    }
                });
            }

            thread::sleep(poll);
        }
    }

    /// Stop and wait for both loops to finish
    pub fn shutdown(mut self) {
        self.stop();
        for (name, handle) in self.tasks.drain(..) {
            if handle.join().is_err() {
                warn!(task = name, "Task panicked during shutdown");
            }
        }
        info!("Transport runtime stopped");
    }
}

impl Drop for TransportRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<E>(ctx: &TransportContext, engine: &E, timeout: Wait, running: &AtomicBool)
where
    E: TransportEngine + ?Sized,
{
    debug!(timeout = ?timeout, "Receive loop started");

    while running.load(Ordering::SeqCst) {
        match ctx.can().receive(timeout) {
            Ok(frame) => {
                trace!(frame = %frame, pci = %Pci::decode(frame.data()), "Frame received");
                if let Err(e) = engine.on_frame(ctx, &frame) {
                    warn!(error = %e, frame = %frame, "Transport engine rejected frame");
                }
            }
            Err(CanIoError::Timeout) => continue,
            Err(e) => {
                error!(error = %e, "CAN receive failed");
                thread::sleep(DRIVER_ERROR_BACKOFF);
            }
        }
    }

    debug!("Receive loop stopped");
}

fn sender_loop<E>(ctx: &TransportContext, engine: &E, mut waiter: GateWaiter, running: &AtomicBool)
where
    E: TransportEngine + ?Sized,
{
    debug!("Sender loop started");

    while running.load(Ordering::SeqCst) {
        if let Err(e) = engine.sender_step(ctx, &mut waiter) {
            warn!(error = %e, "Sender step failed");
            thread::sleep(SENDER_ERROR_BACKOFF);
        }
    }

    debug!("Sender loop stopped");
}
