//! Linux kernel ISO-TP backend
//!
//! Uses the kernel's `CAN_ISOTP` socket as the transport engine: the kernel
//! reassembles requests, paces segmented responses and answers flow control.
//! Complete messages are handed to the same [`ReceptionHandler`] the adapter
//! runtime would call.
//!
//! From the transport configuration the socket takes `st_min_us` as the gap
//! between our consecutive frames, and advertises the receiver parameters
//! (block size 0, STmin 0) in its own flow control. Block size and wait
//! frames of a transmission are dictated by the peer's flow control, so
//! `block_size` and `wft_timeout_us` are reported and ignored here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cantp_bridge::{
    CanIoError, EngineError, IdWidth, ReceptionHandler, SendResult, TransportConfig,
    TransportParams, TransportSend, Wait,
};
use parking_lot::Mutex;
use socketcan::{ExtendedId, Id, StandardId};
use socketcan_isotp::{FlowControlOptions, IsoTpOptions, IsoTpSocket, LinkLayerOptions};
use tracing::{debug, error, info, warn};

use crate::obd::Addressing;

/// Largest ISO-TP payload with a 12-bit first-frame length
pub const MAX_ISOTP_PAYLOAD: usize = 4095;

/// Kernel socket timing derived from a [`TransportConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelTiming {
    /// Gap the kernel keeps between our consecutive frames
    pub frame_txtime: Duration,
    /// Block size advertised in our flow-control frames
    pub fc_block_size: u8,
    /// Encoded STmin advertised in our flow-control frames
    pub fc_st_min: u8,
    /// Wait frames we send before giving up, 0 to never send one
    pub fc_wftmax: u8,
}

impl KernelTiming {
    pub fn from_config(config: &TransportConfig) -> Self {
        let sender = config.sender_params();
        let receiver = TransportParams::receiver();

        if sender.block_size != 0 {
            warn!(
                block_size = sender.block_size,
                "Block size is set by the peer's flow control, ignored by the kernel backend"
            );
        }
        if sender.wft_timeout != Wait::Forever {
            warn!(
                wft_timeout_us = config.wft_timeout_us,
                "Wait-frame timeout has no kernel socket option, ignored"
            );
        }

        Self {
            frame_txtime: sender.st_min,
            fc_block_size: receiver.block_size,
            fc_st_min: encode_st_min(receiver.st_min),
            fc_wftmax: 0,
        }
    }
}

/// ISO 15765-2 STmin byte, rounded up to the next representable value
///
/// 0x00-0x7F are milliseconds, 0xF1-0xF9 are 100-900 microseconds.
pub fn encode_st_min(st_min: Duration) -> u8 {
    let micros = st_min.as_micros();
    match micros {
        0 => 0x00,
        1..=900 => 0xF0 + micros.div_ceil(100) as u8,
        _ => micros.div_ceil(1000).min(0x7F) as u8,
    }
}

/// Kernel ISO-TP socket bound to one tester/ECU identifier pair
pub struct KernelIsoTp {
    addressing: Addressing,
    socket: Mutex<IsoTpSocket>,
    last_result: Mutex<Option<SendResult>>,
}

impl KernelIsoTp {
    /// Open a socket receiving on the tester id and sending from the ECU id
    pub fn open(
        interface: &str,
        addressing: Addressing,
        transport: &TransportConfig,
    ) -> Result<Self, EngineError> {
        let rx_id = can_id(addressing.tester_id, addressing.width)?;
        let tx_id = can_id(addressing.ecu_id, addressing.width)?;
        let timing = KernelTiming::from_config(transport);

        let mut options = IsoTpOptions::default();
        options.set_frame_txtime(timing.frame_txtime).map_err(|_| {
            EngineError::Other(format!("st_min {:?} out of range", timing.frame_txtime))
        })?;
        let flow_control =
            FlowControlOptions::new(timing.fc_block_size, timing.fc_st_min, timing.fc_wftmax);

        let socket = IsoTpSocket::open_with_opts(
            interface,
            rx_id,
            tx_id,
            Some(options),
            Some(flow_control),
            Some(LinkLayerOptions::default()),
        )
        .map_err(|e| {
            CanIoError::Driver(format!("Failed to open ISO-TP socket on {}: {}", interface, e))
        })?;

        socket
            .set_nonblocking(true)
            .map_err(|e| CanIoError::Driver(format!("Failed to set non-blocking: {}", e)))?;

        info!(
            interface,
            rx_id = format!("0x{:X}", addressing.tester_id),
            tx_id = format!("0x{:X}", addressing.ecu_id),
            width = %addressing.width,
            frame_txtime = ?timing.frame_txtime,
            fc_st_min = format!("0x{:02X}", timing.fc_st_min),
            "ISO-TP socket opened"
        );

        Ok(Self {
            addressing,
            socket: Mutex::new(socket),
            last_result: Mutex::new(None),
        })
    }

    /// Deliver requests to `handler` until `running` is cleared
    pub fn serve(&self, handler: &dyn ReceptionHandler, running: &AtomicBool) {
        info!("Waiting for OBD-II requests");

        while running.load(Ordering::SeqCst) {
            // The handler sends through this socket, so the lock ends here
            let outcome = {
                let mut socket = self.socket.lock();
                let outcome = match socket.read() {
                    Ok(data) if !data.is_empty() => Ok(Some(data.to_vec())),
                    Ok(_) => Ok(None),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e),
                };
                outcome
            };

            match outcome {
                Err(e) => {
                    error!(?e, "ISO-TP read error");
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(Some(request)) => {
                    debug!(request = %hex::encode(&request), "Request received");
                    handler.on_message(self.addressing.tester_id, self.addressing.width, &request);

                    if let Some(result) = self.last_result.lock().take() {
                        handler.on_send_result(result);
                    }
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(1)),
            }
        }

        info!("ISO-TP listener stopped");
    }
}

impl TransportSend for KernelIsoTp {
    fn send(&self, id: u32, width: IdWidth, payload: &[u8]) -> Result<(), EngineError> {
        if payload.len() > MAX_ISOTP_PAYLOAD {
            *self.last_result.lock() = Some(SendResult::BufferOverflow);
            return Err(EngineError::PayloadTooLarge(payload.len()));
        }
        if id != self.addressing.ecu_id || width != self.addressing.width {
            warn!(
                can_id = format!("0x{:X}", id),
                bound = format!("0x{:X}", self.addressing.ecu_id),
                "Send identifier differs from the socket's bound identifier"
            );
        }

        let result = self.socket.lock().write(payload);
        match result {
            Ok(()) => {
                *self.last_result.lock() = Some(SendResult::Ok);
                Ok(())
            }
            Err(e) => {
                *self.last_result.lock() = Some(SendResult::Error);
                Err(CanIoError::Driver(e.to_string()).into())
            }
        }
    }
}

fn can_id(id: u32, width: IdWidth) -> Result<Id, EngineError> {
    let id = match width {
        IdWidth::Standard => u16::try_from(id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard),
        IdWidth::Extended => ExtendedId::new(id).map(Id::Extended),
    };
    id.ok_or_else(|| EngineError::Other(format!("Invalid {} CAN ID", width)))
}
