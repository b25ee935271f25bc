//! cantp-bridge - CAN/ISO-TP adapter layer
//!
//! This crate lets an asynchronous CAN controller and a one-shot timer
//! cooperate with a blocking, timer-paced ISO 15765-2 transport engine.
//! The engine itself is external; this crate provides the driver-facing
//! contract it needs and the two long-running loops that drive it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TransportRuntime                          │
//! │                                                             │
//! │   rx thread                         tx thread               │
//! │  ┌──────────────┐                 ┌──────────────────────┐  │
//! │  │ CanIo::      │                 │ TransportEngine::    │  │
//! │  │ receive      │                 │ sender_step          │  │
//! │  └──────┬───────┘                 └──────────┬───────────┘  │
//! │         │ on_frame                   acquire │              │
//! │         ▼                                    ▼              │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                 TransportContext                     │   │
//! │  │  params │ CanIo │ TimerHandle │ GateNotifier │ app   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │         ▲                                    ▲              │
//! │         │ timer_expired             release  │              │
//! │  ┌──────┴───────┐                            │              │
//! │  │ OneShotTimer │────────────────────────────┘              │
//! │  └──────────────┘                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`can_io`] - CAN I/O adapter (mock bus, SocketCAN bus)
//! - [`timer`] - one-shot pacing timer
//! - [`gate`] - single-waiter synchronization gate
//! - [`context`] - shared transport context and protocol parameters
//! - [`engine`] - transport engine callback contract
//! - [`runtime`] - receive and sender loops

pub mod buffer;
pub mod can_io;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gate;
pub mod runtime;
pub mod timer;
pub mod wait;

pub use buffer::{BufferLedger, RxBuffer};
pub use can_io::{CanIo, MockCanBus};
pub use config::{PacingMode, TransportConfig};
pub use context::{Pacing, TransportContext, TransportParams};
pub use engine::{Delivery, ReceptionHandler, SendResult, TransportEngine, TransportSend};
pub use error::{BufferError, CanIoError, EngineError, FrameError, RuntimeError, TimerError};
pub use frame::{CanFrame, IdWidth, Pci};
pub use gate::{gate, GateNotifier, GateWaiter};
pub use runtime::TransportRuntime;
pub use timer::{OneShotTimer, TimerHandle};
pub use wait::Wait;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use can_io::socketcan::SocketCanBus;
