//! CAN I/O adapter
//!
//! Translates the transport engine's generic send/receive requests into
//! controller operations:
//! - In-memory mock bus for testing
//! - SocketCAN raw bus (Linux only)
//!
//! Every call may block up to its [`Wait`]; none of them retries. Driver
//! errors and missing transmit confirmations are reported to the caller,
//! which owns the retry policy.

pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use mock::MockCanBus;

use crate::error::CanIoError;
use crate::frame::CanFrame;
use crate::wait::Wait;

/// Driver-facing contract consumed by the transport engine
pub trait CanIo: Send + Sync {
    /// Block up to `timeout` for the next frame
    ///
    /// Returns [`CanIoError::Timeout`] when nothing arrived in time.
    fn receive(&self, timeout: Wait) -> Result<CanFrame, CanIoError>;

    /// Queue a frame without waiting for it to leave the controller
    fn transmit_nonblocking(&self, frame: &CanFrame) -> Result<(), CanIoError>;

    /// Queue a frame and wait up to `timeout` for transmit completion
    ///
    /// Not observing completion in time is [`CanIoError::NotConfirmed`].
    /// With [`Wait::Forever`] a controller that never signals completion
    /// blocks the caller indefinitely.
    fn transmit_and_confirm(&self, frame: &CanFrame, timeout: Wait) -> Result<(), CanIoError>;
}
