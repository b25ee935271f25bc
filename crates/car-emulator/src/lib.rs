//! car-emulator - OBD-II car emulator
//!
//! Answers OBD-II Service 01 and Service 09 requests with simulated
//! vehicle telemetry. Requests arrive through a transport engine as
//! complete messages; responses are submitted back to it for segmentation.
//!
//! # Modules
//!
//! - [`obd`] - protocol constants, request frames, value encoders
//! - [`telemetry`] - telemetry snapshots and the simulated source
//! - [`responder`] - request to response mapping
//! - [`dispatcher`] - reception handler and per-exchange buffers
//! - [`config`] - configuration and the operator command set
//! - `kernel` - Linux kernel ISO-TP backend

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod obd;
pub mod responder;
pub mod telemetry;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod kernel;

pub use config::{Bitrate, ConfigCommand, EmulatorConfig};
pub use dispatcher::{CallbackContext, Dispatcher};
pub use error::{ConfigError, ObdError};
pub use obd::{Addressing, DiagnosticFrame, ObdResponse};
pub use responder::Responder;
pub use telemetry::{TelemetrySource, VehicleTelemetry, Vin};
