//! Adapter layer errors
//!
//! Nothing here is fatal to the process: driver and timing errors are
//! surfaced to the caller, which decides whether to retry.

use thiserror::Error;

use crate::frame::IdWidth;

/// Invalid frame construction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Data length {0} exceeds 8 bytes")]
    DataTooLong(usize),

    #[error("Identifier 0x{id:X} does not fit a {width} identifier")]
    IdOutOfRange { id: u32, width: IdWidth },
}

/// CAN I/O adapter errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanIoError {
    /// Nothing arrived before the timeout elapsed
    #[error("CAN receive timed out")]
    Timeout,

    /// Controller or driver failure, never retried by the adapter
    #[error("CAN driver error: {0}")]
    Driver(String),

    /// Frame was queued but no transmit-complete signal was observed in time
    #[error("Transmit completion not observed")]
    NotConfirmed,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// One-shot timer errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The timer behind this handle has been shut down
    #[error("Timer handle is invalid")]
    InvalidHandle,

    /// A previous arming has neither fired nor been stopped
    #[error("Timer is already running")]
    AlreadyRunning,
}

/// Receive buffer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Failed to allocate {requested} bytes")]
    AllocationFailed { requested: usize },

    #[error("Buffer overflow: capacity {capacity}, attempted {attempted}")]
    Overflow { capacity: usize, attempted: usize },
}

/// Errors reported by a transport engine through the adapter contract
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Can(#[from] CanIoError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A send is already in progress
    #[error("Transport engine busy")]
    Busy,

    /// Payload does not fit the transport (e.g. beyond 4095 bytes)
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// The waiter offered as proof of holding the gate belongs to another gate
    #[error("Gate waiter does not belong to this context")]
    ForeignGate,

    #[error("Transport engine error: {0}")]
    Other(String),
}

/// Task supervision outcome
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A long-running loop returned while the runtime was still running
    #[error("Task '{0}' terminated unexpectedly")]
    TaskTerminated(&'static str),

    #[error("Task '{0}' panicked")]
    TaskPanicked(&'static str),

    #[error("Failed to spawn task '{name}': {reason}")]
    Spawn { name: &'static str, reason: String },
}
