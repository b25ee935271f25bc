//! SocketCAN raw bus (Linux only)
//!
//! The receive path and the confirmed transmit path each own a blocking
//! socket whose kernel timeout is set per call. The fast path writes through
//! a separate non-blocking socket. The kernel accepting a frame on a
//! blocking write stands in for the controller's transmit-complete alert.

use std::io;
use std::time::Duration;

use parking_lot::Mutex;
use socketcan::{
    CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, StandardId,
};
use tracing::{debug, warn};

use super::CanIo;
use crate::error::CanIoError;
use crate::frame::{CanFrame, IdWidth};
use crate::wait::Wait;

/// Raw SocketCAN implementation of [`CanIo`]
pub struct SocketCanBus {
    interface: String,
    rx: Mutex<CanSocket>,
    tx: Mutex<CanSocket>,
    tx_nonblocking: CanSocket,
}

impl SocketCanBus {
    /// Open the interface (e.g. `can0`, `vcan0`)
    pub fn open(interface: &str) -> Result<Self, CanIoError> {
        let open = |purpose: &str| {
            CanSocket::open(interface).map_err(|e| {
                CanIoError::Driver(format!(
                    "Failed to open {} socket on {}: {}",
                    purpose, interface, e
                ))
            })
        };

        let rx = open("receive")?;
        let tx = open("transmit")?;
        let tx_nonblocking = open("fast transmit")?;
        tx_nonblocking
            .set_nonblocking(true)
            .map_err(|e| CanIoError::Driver(format!("Failed to set non-blocking: {}", e)))?;

        debug!(interface, "SocketCAN bus opened");

        Ok(Self {
            interface: interface.to_string(),
            rx: Mutex::new(rx),
            tx: Mutex::new(tx),
            tx_nonblocking,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanIo for SocketCanBus {
    fn receive(&self, timeout: Wait) -> Result<CanFrame, CanIoError> {
        let socket = self.rx.lock();
        socket
            .set_read_timeout(timeout.as_duration().map(non_zero))
            .map_err(driver_error)?;

        match socket.read_frame() {
            Ok(SocketFrame::Error(frame)) => {
                warn!(interface = %self.interface, frame = ?frame, "CAN error frame");
                Err(CanIoError::Driver(format!("error frame 0x{:X}", frame.raw_id())))
            }
            Ok(frame) => from_socket_frame(&frame),
            Err(e) if is_timeout(&e) => Err(CanIoError::Timeout),
            Err(e) => Err(driver_error(e)),
        }
    }

    fn transmit_nonblocking(&self, frame: &CanFrame) -> Result<(), CanIoError> {
        let frame = to_socket_frame(frame)?;
        self.tx_nonblocking
            .write_frame(&frame)
            .map_err(driver_error)
    }

    fn transmit_and_confirm(&self, frame: &CanFrame, timeout: Wait) -> Result<(), CanIoError> {
        let frame = to_socket_frame(frame)?;
        let socket = self.tx.lock();
        socket
            .set_write_timeout(timeout.as_duration().map(non_zero))
            .map_err(driver_error)?;

        match socket.write_frame(&frame) {
            Ok(()) => Ok(()),
            Err(e) if is_timeout(&e) => Err(CanIoError::NotConfirmed),
            Err(e) => Err(driver_error(e)),
        }
    }
}

/// A zero socket timeout means "no timeout" to the kernel
fn non_zero(duration: Duration) -> Duration {
    duration.max(Duration::from_micros(1))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn driver_error(e: io::Error) -> CanIoError {
    CanIoError::Driver(e.to_string())
}

fn to_socket_frame(frame: &CanFrame) -> Result<SocketFrame, CanIoError> {
    let id: Id = match frame.width() {
        IdWidth::Standard => u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard),
        IdWidth::Extended => ExtendedId::new(frame.id()).map(Id::Extended),
    }
    .ok_or_else(|| CanIoError::Driver(format!("Invalid CAN ID: 0x{:X}", frame.id())))?;

    SocketFrame::new(id, frame.data())
        .ok_or_else(|| CanIoError::Driver(format!("Invalid CAN frame: {}", frame)))
}

fn from_socket_frame(frame: &SocketFrame) -> Result<CanFrame, CanIoError> {
    let width = if frame.is_extended() {
        IdWidth::Extended
    } else {
        IdWidth::Standard
    };
    Ok(CanFrame::new(frame.raw_id(), width, frame.data())?)
}
