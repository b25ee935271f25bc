//! OBD-II protocol constants, request frames and value encoders

use cantp_bridge::IdWidth;

use crate::error::ObdError;

/// OBD-II service codes
pub mod service {
    /// Show current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Request vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}

/// Service 01 PIDs
pub mod pid01 {
    pub const SUPPORTED_01_20: u8 = 0x00;
    pub const ENGINE_RPM: u8 = 0x0C;
    pub const VEHICLE_SPEED: u8 = 0x0D;
    pub const THROTTLE_POSITION: u8 = 0x11;
    /// Later "supported PIDs" blocks (21-40 ... E1-FF)
    pub const SUPPORTED_BLOCKS: [u8; 7] = [0x20, 0x40, 0x60, 0x80, 0xA0, 0xC0, 0xE0];
}

/// Service 09 PIDs
pub mod pid09 {
    pub const SUPPORTED_01_20: u8 = 0x00;
    pub const VIN: u8 = 0x02;
}

/// Offset added to the request service in a positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Smallest diagnostic request: service and PID
pub const MIN_REQUEST_LEN: usize = 2;

/// Largest single-frame diagnostic request: service, PID and 5 data bytes
pub const MAX_REQUEST_LEN: usize = 7;

/// Length of a vehicle identification number
pub const VIN_LEN: usize = 17;

/// Fixed tester and ECU identifiers for one addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    /// Functional request identifier the tester sends to
    pub tester_id: u32,
    /// Identifier the ECU responds from
    pub ecu_id: u32,
    pub width: IdWidth,
}

impl Addressing {
    pub const STANDARD: Addressing = Addressing {
        tester_id: 0x7DF,
        ecu_id: 0x7E8,
        width: IdWidth::Standard,
    };

    pub const EXTENDED: Addressing = Addressing {
        tester_id: 0x18DB_33F1,
        ecu_id: 0x18DA_F110,
        width: IdWidth::Extended,
    };

    /// Addressing selected by the configured identifier width
    pub fn for_width(width: IdWidth) -> Self {
        match width {
            IdWidth::Standard => Self::STANDARD,
            IdWidth::Extended => Self::EXTENDED,
        }
    }
}

/// A reassembled diagnostic request
///
/// The payload is stored once and read either as raw bytes or as
/// service / PID / data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticFrame {
    id: u32,
    width: IdWidth,
    len: u8,
    data: [u8; MAX_REQUEST_LEN],
}

impl DiagnosticFrame {
    /// Copy a request payload of 2 to 7 bytes
    pub fn new(id: u32, width: IdWidth, payload: &[u8]) -> Result<Self, ObdError> {
        if payload.len() < MIN_REQUEST_LEN {
            return Err(ObdError::RequestTooShort(payload.len()));
        }
        if payload.len() > MAX_REQUEST_LEN {
            return Err(ObdError::RequestTooLong(payload.len()));
        }

        let mut data = [0u8; MAX_REQUEST_LEN];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            id,
            width,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> IdWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw payload view
    pub fn raw(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn service(&self) -> u8 {
        self.data[0]
    }

    pub fn pid(&self) -> u8 {
        self.data[1]
    }

    /// Data bytes following service and PID
    pub fn pid_data(&self) -> &[u8] {
        let len = self.len as usize;
        if len > 2 {
            &self.data[2..len]
        } else {
            &[]
        }
    }
}

/// Response ready for the transport engine's send entrypoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObdResponse {
    pub id: u32,
    pub width: IdWidth,
    /// Logical payload; may exceed one CAN frame
    pub payload: Vec<u8>,
}

impl ObdResponse {
    /// Positive response header followed by `data`
    pub fn positive(addressing: Addressing, service: u8, pid: u8, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(2 + data.len());
        payload.push(service + POSITIVE_RESPONSE_OFFSET);
        payload.push(pid);
        payload.extend_from_slice(data);

        Self {
            id: addressing.ecu_id,
            width: addressing.width,
            payload,
        }
    }

    pub fn service(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }

    pub fn pid(&self) -> u8 {
        self.payload.get(1).copied().unwrap_or(0)
    }

    pub fn data(&self) -> &[u8] {
        self.payload.get(2..).unwrap_or_default()
    }
}

/// Engine speed: ((A * 256) + B) / 4 rpm
pub fn encode_rpm(rpm: f32) -> [u8; 2] {
    let raw = (rpm * 4.0).round().clamp(0.0, u16::MAX as f32) as u16;
    raw.to_be_bytes()
}

pub fn decode_rpm(bytes: [u8; 2]) -> f32 {
    u16::from_be_bytes(bytes) as f32 / 4.0
}

/// Vehicle speed: A km/h
pub fn encode_speed(kmh: f32) -> u8 {
    kmh.round().clamp(0.0, u8::MAX as f32) as u8
}

pub fn decode_speed(byte: u8) -> f32 {
    byte as f32
}

/// Throttle position: A * 100 / 255 %
pub fn encode_throttle(percent: f32) -> u8 {
    (percent * 255.0 / 100.0).round().clamp(0.0, u8::MAX as f32) as u8
}

pub fn decode_throttle(byte: u8) -> f32 {
    byte as f32 * 100.0 / 255.0
}
