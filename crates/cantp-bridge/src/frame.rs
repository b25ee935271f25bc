//! Link-layer CAN frame shared by every adapter
//!
//! A frame carries an 11-bit (standard) or 29-bit (extended) identifier and
//! 0-8 data bytes. [`Pci`] decodes the ISO 15765-2 protocol control
//! information of a frame for logging only; segmentation and reassembly
//! belong to the transport engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Maximum data length of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Largest 11-bit identifier
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Largest 29-bit identifier
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// CAN identifier width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdWidth {
    /// 11-bit identifier
    #[default]
    Standard,
    /// 29-bit identifier
    Extended,
}

impl IdWidth {
    pub fn is_extended(self) -> bool {
        matches!(self, IdWidth::Extended)
    }

    /// Largest identifier representable with this width
    pub fn max_id(self) -> u32 {
        match self {
            IdWidth::Standard => STANDARD_ID_MAX,
            IdWidth::Extended => EXTENDED_ID_MAX,
        }
    }
}

impl fmt::Display for IdWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdWidth::Standard => write!(f, "standard (11-bit)"),
            IdWidth::Extended => write!(f, "extended (29-bit)"),
        }
    }
}

/// A classic CAN data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    width: IdWidth,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl CanFrame {
    /// Build a frame, validating the identifier range and data length
    pub fn new(id: u32, width: IdWidth, data: &[u8]) -> Result<Self, FrameError> {
        if id > width.max_id() {
            return Err(FrameError::IdOutOfRange { id, width });
        }
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::DataTooLong(data.len()));
        }

        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);

        Ok(Self {
            id,
            width,
            len: data.len() as u8,
            data: buf,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> IdWidth {
        self.width
    }

    /// Data length code (0-8)
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Populated data bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            IdWidth::Standard => write!(f, "0x{:03X}", self.id)?,
            IdWidth::Extended => write!(f, "0x{:08X}", self.id)?,
        }
        write!(f, " [{}]", self.len)?;
        for byte in self.data() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Flow status carried by a flow control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
    Reserved(u8),
}

impl From<u8> for FlowStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => FlowStatus::ContinueToSend,
            1 => FlowStatus::Wait,
            2 => FlowStatus::Overflow,
            other => FlowStatus::Reserved(other),
        }
    }
}

/// Decoded protocol control information of a link-layer frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pci {
    Single { len: u8 },
    First { len: u16 },
    Consecutive { sn: u8 },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
    },
    Unknown(u8),
    Empty,
}

impl Pci {
    /// Decode the PCI bytes at the start of `data`
    pub fn decode(data: &[u8]) -> Self {
        let Some(&first) = data.first() else {
            return Pci::Empty;
        };

        match first >> 4 {
            0x0 => Pci::Single { len: first & 0x0F },
            0x1 => {
                let low = data.get(1).copied().unwrap_or(0) as u16;
                Pci::First {
                    len: (((first & 0x0F) as u16) << 8) | low,
                }
            }
            0x2 => Pci::Consecutive { sn: first & 0x0F },
            0x3 => Pci::FlowControl {
                status: FlowStatus::from(first & 0x0F),
                block_size: data.get(1).copied().unwrap_or(0),
                st_min: data.get(2).copied().unwrap_or(0),
            },
            _ => Pci::Unknown(first),
        }
    }
}

impl fmt::Display for Pci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pci::Single { len } => write!(f, "single frame len={}", len),
            Pci::First { len } => write!(f, "first frame len={}", len),
            Pci::Consecutive { sn } => write!(f, "consecutive frame SN={:X}", sn),
            Pci::FlowControl {
                status,
                block_size,
                st_min,
            } => write!(
                f,
                "flow control FlowStatus={:?} BlockSize={} STmin={:X}",
                status, block_size, st_min
            ),
            Pci::Unknown(byte) => write!(f, "unknown PCI 0x{:02X}", byte),
            Pci::Empty => write!(f, "empty frame"),
        }
    }
}
