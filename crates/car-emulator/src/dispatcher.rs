//! Frame reception dispatcher
//!
//! Receives complete application messages from the transport engine, moves
//! each into a freshly allocated [`RxBuffer`] and hands the resulting
//! [`CallbackContext`] to the responder by value. The responder consumes
//! it, so every buffer is released exactly once.
//!
//! One exchange at a time: while a buffer handed out by `on_first_frame` is
//! alive, further first frames and single-frame messages are refused.

use std::sync::Arc;

use cantp_bridge::{
    BufferLedger, Delivery, IdWidth, ReceptionHandler, RxBuffer, SendResult, TransportSend,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ObdError;
use crate::obd::DiagnosticFrame;
use crate::responder::Responder;
use crate::telemetry::TelemetrySource;

/// The message currently being processed, with its owned payload
#[derive(Debug)]
pub struct CallbackContext {
    pub id: u32,
    pub width: IdWidth,
    pub len: usize,
    pub data: RxBuffer,
}

impl CallbackContext {
    pub fn new(id: u32, width: IdWidth, data: RxBuffer) -> Self {
        Self {
            id,
            width,
            len: data.len(),
            data,
        }
    }

    /// Decode the payload as a diagnostic request, releasing the buffer
    pub fn into_request(self) -> Result<DiagnosticFrame, ObdError> {
        DiagnosticFrame::new(self.id, self.width, self.data.as_slice())
    }
}

/// [`ReceptionHandler`] feeding the OBD-II responder
pub struct Dispatcher {
    responder: Responder,
    telemetry: Arc<TelemetrySource>,
    sender: Arc<dyn TransportSend>,
    ledger: BufferLedger,
    /// Held while an exchange is admitted or delivered
    slot: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        width: IdWidth,
        telemetry: Arc<TelemetrySource>,
        sender: Arc<dyn TransportSend>,
    ) -> Self {
        Self {
            responder: Responder::new(width),
            telemetry,
            sender,
            ledger: BufferLedger::new(),
            slot: Mutex::new(()),
        }
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    /// Allocation and release counters of every exchange buffer
    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    /// A pre-allocated buffer handed to the engine is still alive
    fn exchange_in_flight(&self) -> bool {
        self.ledger.outstanding() > 0
    }

    fn deliver(&self, exchange: CallbackContext) -> Delivery {
        debug!(
            can_id = format!("0x{:X}", exchange.id),
            width = %exchange.width,
            len = exchange.len,
            payload = %hex::encode(exchange.data.as_slice()),
            "Message received"
        );

        let telemetry = self.telemetry.snapshot();
        self.responder
            .handle(exchange, &telemetry, self.sender.as_ref());

        Delivery::Accepted
    }
}

impl ReceptionHandler for Dispatcher {
    fn on_message(&self, id: u32, width: IdWidth, payload: &[u8]) -> Delivery {
        let _slot = self.slot.lock();

        if self.exchange_in_flight() {
            warn!(
                can_id = format!("0x{:X}", id),
                "Dropping message, a multi-frame exchange is still in flight"
            );
            return Delivery::Dropped;
        }

        let data = match RxBuffer::copy_from(payload, &self.ledger) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "Dropping message, buffer allocation failed");
                return Delivery::Dropped;
            }
        };

        self.deliver(CallbackContext::new(id, width, data))
    }

    fn on_first_frame(&self, id: u32, width: IdWidth, declared_len: usize) -> Option<RxBuffer> {
        let _slot = self.slot.lock();
        let addressing = self.responder.addressing();
        info!(
            can_id = format!("0x{:X}", id),
            width = %width,
            declared_len,
            "First frame received"
        );

        if width != addressing.width || id != addressing.tester_id {
            warn!(
                can_id = format!("0x{:X}", id),
                expected = format!("0x{:X}", addressing.tester_id),
                "Rejected first frame from unexpected sender"
            );
            return None;
        }

        if self.exchange_in_flight() {
            warn!(
                outstanding = self.ledger.outstanding(),
                "Rejected first frame, previous exchange buffer not yet released"
            );
            return None;
        }

        match RxBuffer::allocate(declared_len, &self.ledger) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                warn!(error = %e, "Rejected first frame, buffer allocation failed");
                None
            }
        }
    }

    fn on_buffer_filled(&self, id: u32, width: IdWidth, buffer: RxBuffer) -> Delivery {
        let _slot = self.slot.lock();
        self.deliver(CallbackContext::new(id, width, buffer))
    }

    fn on_send_result(&self, result: SendResult) {
        if result.is_ok() {
            info!(result = %result, "Send completed");
        } else {
            warn!(result = %result, "Send failed");
        }
    }
}
