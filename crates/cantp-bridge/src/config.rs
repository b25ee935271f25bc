//! Transport configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{Pacing, TransportParams};
use crate::wait::Wait;

/// Transport layer settings, usually embedded in an application config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Separation time minimum when sending (microseconds)
    #[serde(default = "default_st_min_us")]
    pub st_min_us: u64,

    /// Flow-control block size when sending, 0 for unlimited
    #[serde(default)]
    pub block_size: u8,

    /// Wait-frame timeout (microseconds), 0 waits forever
    #[serde(default)]
    pub wft_timeout_us: u64,

    /// Receive poll timeout (microseconds), 0 waits forever
    #[serde(default = "default_rx_timeout_us")]
    pub rx_timeout_us: u64,

    /// Platform delay behaviour
    #[serde(default)]
    pub pacing: PacingMode,

    /// Delay used by fixed pacing (milliseconds)
    #[serde(default = "default_fixed_pacing_ms")]
    pub fixed_pacing_ms: u64,
}

fn default_st_min_us() -> u64 {
    127_000
}

fn default_rx_timeout_us() -> u64 {
    100_000
}

fn default_fixed_pacing_ms() -> u64 {
    100
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            st_min_us: default_st_min_us(),
            block_size: 0,
            wft_timeout_us: 0,
            rx_timeout_us: default_rx_timeout_us(),
            pacing: PacingMode::default(),
            fixed_pacing_ms: default_fixed_pacing_ms(),
        }
    }
}

/// How the platform delay routine treats requested durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    /// Coarse fixed delay regardless of the request
    #[default]
    Fixed,
    /// Honour the requested delay
    Requested,
}

impl TransportConfig {
    /// Flow-control parameters used when sending
    pub fn sender_params(&self) -> TransportParams {
        TransportParams {
            st_min: Duration::from_micros(self.st_min_us),
            block_size: self.block_size,
            wft_timeout: Wait::from_micros(self.wft_timeout_us),
        }
    }

    pub fn pacing(&self) -> Pacing {
        match self.pacing {
            PacingMode::Fixed => Pacing::Fixed(Duration::from_millis(self.fixed_pacing_ms)),
            PacingMode::Requested => Pacing::Requested,
        }
    }

    pub fn rx_timeout(&self) -> Wait {
        Wait::from_micros(self.rx_timeout_us)
    }
}
