//! Vehicle telemetry
//!
//! The responder never reads shared state directly: it is handed a
//! [`VehicleTelemetry`] snapshot per request. [`TelemetrySource`] owns the
//! live values and, when simulation is on, moves them in a bounded random
//! walk.

use std::fmt;

use parking_lot::RwLock;
use rand::Rng;
use tracing::debug;

use crate::error::ObdError;
use crate::obd::VIN_LEN;

/// Vehicle identification number (17 ASCII characters)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vin([u8; VIN_LEN]);

impl Vin {
    pub fn as_bytes(&self) -> &[u8; VIN_LEN] {
        &self.0
    }
}

impl TryFrom<&str> for Vin {
    type Error = ObdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes.len() != VIN_LEN || !value.is_ascii() {
            return Err(ObdError::InvalidVin {
                expected: VIN_LEN,
                actual: value.chars().count(),
            });
        }

        let mut vin = [0u8; VIN_LEN];
        vin.copy_from_slice(bytes);
        Ok(Self(vin))
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Always ASCII by construction
        for &byte in &self.0 {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vin({})", self)
    }
}

/// Point-in-time vehicle state read by the responder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleTelemetry {
    pub speed_kmh: f32,
    pub rpm: f32,
    pub throttle_pct: f32,
    pub vin: Vin,
}

impl Default for VehicleTelemetry {
    fn default() -> Self {
        Self {
            speed_kmh: 100.0,
            rpm: 2500.0,
            throttle_pct: 30.0,
            vin: Vin(*b"ESP32OBD2EMULATOR"),
        }
    }
}

/// Bounds and step of one simulated signal
#[derive(Debug, Clone, Copy)]
struct Walk {
    min: f32,
    max: f32,
    step: f32,
}

impl Walk {
    fn apply<R: Rng>(&self, rng: &mut R, value: f32) -> f32 {
        let delta = rng.gen_range(-self.step..=self.step);
        (value + delta).clamp(self.min, self.max)
    }
}

const SPEED_WALK: Walk = Walk {
    min: 0.0,
    max: 250.0,
    step: 2.0,
};

const RPM_WALK: Walk = Walk {
    min: 700.0,
    max: 6500.0,
    step: 75.0,
};

const THROTTLE_WALK: Walk = Walk {
    min: 0.0,
    max: 100.0,
    step: 1.5,
};

/// Owner of the live telemetry values
#[derive(Debug)]
pub struct TelemetrySource {
    state: RwLock<VehicleTelemetry>,
}

impl TelemetrySource {
    pub fn new(initial: VehicleTelemetry) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    /// Copy of the current values
    pub fn snapshot(&self) -> VehicleTelemetry {
        *self.state.read()
    }

    /// Overwrite values, e.g. from an external feed
    pub fn set<F>(&self, update: F)
    where
        F: FnOnce(&mut VehicleTelemetry),
    {
        let mut state = self.state.write();
        update(&mut *state);
    }

    /// Advance the simulation by one step
    pub fn update(&self) {
        let mut rng = rand::thread_rng();
        let mut state = self.state.write();

        state.speed_kmh = SPEED_WALK.apply(&mut rng, state.speed_kmh);
        state.rpm = RPM_WALK.apply(&mut rng, state.rpm);
        state.throttle_pct = THROTTLE_WALK.apply(&mut rng, state.throttle_pct);

        debug!(
            speed_kmh = state.speed_kmh,
            rpm = state.rpm,
            throttle_pct = state.throttle_pct,
            "Telemetry updated"
        );
    }
}

impl Default for TelemetrySource {
    fn default() -> Self {
        Self::new(VehicleTelemetry::default())
    }
}
