//! Transport engine contract
//!
//! The ISO 15765-2 segmentation and reassembly state machine is an external
//! collaborator. This module fixes the contract between it and the adapter
//! layer in both directions:
//!
//! ```text
//!   CanIo ──frames──▶ TransportEngine::on_frame ──▶ ReceptionHandler
//!                          │  ▲                        (dispatcher)
//!         sender_step ◀────┘  │ TransportSend::send ◀── responder
//!         (gate, timer)       │
//!   CanIo ◀──frames───────────┘
//! ```
//!
//! An engine drives the adapters through the [`TransportContext`] it is
//! handed; it never owns them.

use std::fmt;

use crate::buffer::RxBuffer;
use crate::context::TransportContext;
use crate::error::EngineError;
use crate::frame::{CanFrame, IdWidth};
use crate::gate::GateWaiter;

/// Terminal outcome of an outbound message (ISO 15765-2 `N_Result`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    TimeoutA,
    TimeoutBs,
    TimeoutCr,
    WrongSn,
    InvalidFs,
    UnexpectedPdu,
    WftOverrun,
    BufferOverflow,
    Error,
}

impl SendResult {
    pub fn is_ok(self) -> bool {
        matches!(self, SendResult::Ok)
    }

    /// Standard `N_Result` name
    pub fn as_str(self) -> &'static str {
        match self {
            SendResult::Ok => "N_OK",
            SendResult::TimeoutA => "N_TIMEOUT_A",
            SendResult::TimeoutBs => "N_TIMEOUT_BS",
            SendResult::TimeoutCr => "N_TIMEOUT_CR",
            SendResult::WrongSn => "N_WRONG_SN",
            SendResult::InvalidFs => "N_INVALID_FS",
            SendResult::UnexpectedPdu => "N_UNEXP_PDU",
            SendResult::WftOverrun => "N_WFT_OVRN",
            SendResult::BufferOverflow => "N_BUFFER_OVFLW",
            SendResult::Error => "N_ERROR",
        }
    }
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a delivered message was taken by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Dropped,
}

/// Application callbacks invoked by the engine
pub trait ReceptionHandler: Send + Sync {
    /// A complete application message arrived (single or multi frame)
    ///
    /// Called exactly once per message. The engine has already consumed the
    /// message whatever the result; it never redelivers.
    fn on_message(&self, id: u32, width: IdWidth, payload: &[u8]) -> Delivery;

    /// A multi-frame reception is about to start
    ///
    /// Returning a buffer accepts the exchange; the engine fills it and
    /// hands it back through [`ReceptionHandler::on_buffer_filled`].
    /// `None` aborts the exchange.
    fn on_first_frame(&self, id: u32, width: IdWidth, declared_len: usize) -> Option<RxBuffer>;

    /// A buffer handed out by `on_first_frame` was filled
    fn on_buffer_filled(&self, id: u32, width: IdWidth, buffer: RxBuffer) -> Delivery {
        self.on_message(id, width, buffer.as_slice())
    }

    /// Terminal outcome of the last outbound message
    fn on_send_result(&self, result: SendResult);
}

/// Entrypoint for submitting outbound application messages
pub trait TransportSend: Send + Sync {
    /// Queue `payload` for transmission to `id`; segmentation is the
    /// engine's concern, payloads may be longer than one frame
    fn send(&self, id: u32, width: IdWidth, payload: &[u8]) -> Result<(), EngineError>;
}

/// Hooks the runtime drives on behalf of the engine
pub trait TransportEngine: TransportSend {
    /// Feed one received link-layer frame
    fn on_frame(&self, ctx: &TransportContext, frame: &CanFrame) -> Result<(), EngineError>;

    /// Advance the sender state machine by one step
    ///
    /// Runs on the sender task, which owns the only gate waiter. The step
    /// is expected to block on the gate between protocol-timing decisions.
    fn sender_step(&self, ctx: &TransportContext, gate: &mut GateWaiter)
        -> Result<(), EngineError>;

    /// Pacing timer expired
    ///
    /// Runs on the timer-service thread: brief non-blocking work only,
    /// typically a state update followed by a gate release.
    fn timer_expired(&self, ctx: &TransportContext);
}
