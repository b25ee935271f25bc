//! Emulator configuration
//!
//! Loaded from TOML or YAML, overridden from the command line, and
//! optionally adjusted with the operator command set before the run phase.
//! Once the run phase starts the configuration is frozen behind an `Arc`.

use std::fmt;
use std::path::Path;

use cantp_bridge::{IdWidth, TransportConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::telemetry::{VehicleTelemetry, Vin};

/// Complete emulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// CAN bus bit rate
    #[serde(default)]
    pub bitrate: Bitrate,

    /// Identifier width used for OBD-II addressing
    #[serde(default)]
    pub id_width: IdWidth,

    /// CAN interface
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Initial vehicle state and simulation
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Transport layer parameters
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_interface() -> String {
    "vcan0".to_string()
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            bitrate: Bitrate::default(),
            id_width: IdWidth::default(),
            interface: default_interface(),
            telemetry: TelemetryConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl EmulatorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the loader by file extension
    pub fn load_any(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::load_yaml(path),
            _ => Self::load(path),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.telemetry.initial()?;
        if self.interface.is_empty() {
            return Err(ConfigError::Invalid("interface must not be empty".to_string()));
        }
        Ok(())
    }

    /// Apply one operator command
    pub fn apply(&mut self, command: ConfigCommand) {
        match command {
            ConfigCommand::Bitrate(bitrate) => self.bitrate = bitrate,
            ConfigCommand::IdWidth(width) => self.id_width = width,
            ConfigCommand::Go | ConfigCommand::Help => {}
        }
    }
}

// =============================================================================
// Bit rate
// =============================================================================

/// Supported bus bit-rate presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Bitrate {
    #[serde(rename = "250k")]
    Kbps250,
    #[default]
    #[serde(rename = "500k")]
    Kbps500,
}

/// Controller bit timing for a preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitTiming {
    pub bitrate: u32,
    /// Sample point as a fraction of the bit time
    pub sample_point: f32,
    pub triple_sampling: bool,
}

impl Bitrate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            Bitrate::Kbps250 => 250_000,
            Bitrate::Kbps500 => 500_000,
        }
    }

    pub fn timing(self) -> BitTiming {
        BitTiming {
            bitrate: self.bits_per_second(),
            sample_point: 0.75,
            triple_sampling: true,
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}kbps", self.bits_per_second() / 1000)
    }
}

impl std::str::FromStr for Bitrate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_end_matches("bps") {
            "250k" | "250" | "250000" => Ok(Bitrate::Kbps250),
            "500k" | "500" | "500000" => Ok(Bitrate::Kbps500),
            other => Err(ConfigError::Invalid(format!("Unsupported bit rate: {}", other))),
        }
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// Initial telemetry and simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_speed")]
    pub speed_kmh: f32,

    #[serde(default = "default_rpm")]
    pub rpm: f32,

    #[serde(default = "default_throttle")]
    pub throttle_pct: f32,

    #[serde(default = "default_vin")]
    pub vin: String,

    /// Random-walk the values while running
    #[serde(default)]
    pub simulate: bool,

    /// Simulation step period (milliseconds)
    #[serde(default = "default_update_period_ms")]
    pub update_period_ms: u64,
}

fn default_speed() -> f32 {
    100.0
}

fn default_rpm() -> f32 {
    2500.0
}

fn default_throttle() -> f32 {
    30.0
}

fn default_vin() -> String {
    "ESP32OBD2EMULATOR".to_string()
}

fn default_update_period_ms() -> u64 {
    100
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            speed_kmh: default_speed(),
            rpm: default_rpm(),
            throttle_pct: default_throttle(),
            vin: default_vin(),
            simulate: false,
            update_period_ms: default_update_period_ms(),
        }
    }
}

impl TelemetryConfig {
    /// Starting telemetry values
    pub fn initial(&self) -> Result<VehicleTelemetry, ConfigError> {
        let vin = Vin::try_from(self.vin.as_str())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(VehicleTelemetry {
            speed_kmh: self.speed_kmh,
            rpm: self.rpm,
            throttle_pct: self.throttle_pct,
            vin,
        })
    }
}

// =============================================================================
// Operator commands
// =============================================================================

/// Operator command help text
pub const HELP: &str = "\
Commands:
go        start simulator
bpr=250   sets the baudrate to 250kbps
bpr=500   sets the baudrate to 500kbps
idt=STD   sets the ID type to Standard (11bit)
idt=EXT   sets the ID type to Extended (29bit)
help      this menu";

/// One line of the pre-run command set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Freeze the configuration and start
    Go,
    Help,
    Bitrate(Bitrate),
    IdWidth(IdWidth),
}

impl ConfigCommand {
    /// Parse one line; `None` for a blank line
    pub fn parse(line: &str) -> Option<Result<Self, ConfigError>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        Some(match line {
            "go" => Ok(ConfigCommand::Go),
            "help" => Ok(ConfigCommand::Help),
            "bpr=250" => Ok(ConfigCommand::Bitrate(Bitrate::Kbps250)),
            "bpr=500" => Ok(ConfigCommand::Bitrate(Bitrate::Kbps500)),
            "idt=STD" => Ok(ConfigCommand::IdWidth(IdWidth::Standard)),
            "idt=EXT" => Ok(ConfigCommand::IdWidth(IdWidth::Extended)),
            _ => Err(ConfigError::Invalid("Wrong command".to_string())),
        })
    }

    /// Confirmation shown after applying the command
    pub fn describe(&self) -> String {
        match self {
            ConfigCommand::Go => "START".to_string(),
            ConfigCommand::Help => HELP.to_string(),
            ConfigCommand::Bitrate(bitrate) => format!("Baudrate set to {}", bitrate),
            ConfigCommand::IdWidth(IdWidth::Standard) => "ID type is Standard".to_string(),
            ConfigCommand::IdWidth(IdWidth::Extended) => "ID type is Extended".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmulatorConfig::default();
        assert_eq!(config.bitrate, Bitrate::Kbps500);
        assert_eq!(config.id_width, IdWidth::Standard);
        assert_eq!(config.interface, "vcan0");
        assert_eq!(config.transport.st_min_us, 127_000);
        assert_eq!(config.telemetry.initial().unwrap(), VehicleTelemetry::default());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
bitrate = "250k"
id_width = "extended"
interface = "can0"

[telemetry]
speed_kmh = 42.0
vin = "1HGCM82633A123456"
simulate = true

[transport]
block_size = 4
"#;
        let config: EmulatorConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.bitrate, Bitrate::Kbps250);
        assert_eq!(config.id_width, IdWidth::Extended);
        assert_eq!(config.interface, "can0");
        assert_eq!(config.telemetry.speed_kmh, 42.0);
        assert_eq!(config.telemetry.rpm, 2500.0);
        assert!(config.telemetry.simulate);
        assert_eq!(config.transport.block_size, 4);
        assert_eq!(config.transport.st_min_us, 127_000);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
bitrate: 500k
id_width: standard
telemetry:
  rpm: 3000.0
"#;
        let config: EmulatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bitrate, Bitrate::Kbps500);
        assert_eq!(config.telemetry.rpm, 3000.0);
        assert_eq!(config.interface, "vcan0");
    }

    #[test]
    fn test_load_rejects_bad_vin() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[telemetry]\nvin = \"TOO-SHORT\"").unwrap();

        let err = EmulatorConfig::load_any(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "id_width: extended\ninterface: can1").unwrap();

        let config = EmulatorConfig::load_any(file.path()).unwrap();
        assert_eq!(config.id_width, IdWidth::Extended);
        assert_eq!(config.interface, "can1");
    }

    #[test]
    fn test_bit_timing() {
        let timing = Bitrate::Kbps250.timing();
        assert_eq!(timing.bitrate, 250_000);
        assert_eq!(timing.sample_point, 0.75);
        assert!(timing.triple_sampling);
        assert_eq!(Bitrate::Kbps500.to_string(), "500kbps");
    }

    #[rstest]
    #[case("250k", Bitrate::Kbps250)]
    #[case("500", Bitrate::Kbps500)]
    #[case("500kbps", Bitrate::Kbps500)]
    fn test_bitrate_from_str(#[case] input: &str, #[case] expected: Bitrate) {
        assert_eq!(input.parse::<Bitrate>().unwrap(), expected);
    }

    #[rstest]
    #[case("go", ConfigCommand::Go)]
    #[case("  help\r", ConfigCommand::Help)]
    #[case("bpr=250", ConfigCommand::Bitrate(Bitrate::Kbps250))]
    #[case("bpr=500", ConfigCommand::Bitrate(Bitrate::Kbps500))]
    #[case("idt=STD", ConfigCommand::IdWidth(IdWidth::Standard))]
    #[case("idt=EXT", ConfigCommand::IdWidth(IdWidth::Extended))]
    fn test_command_parse(#[case] line: &str, #[case] expected: ConfigCommand) {
        assert_eq!(ConfigCommand::parse(line).unwrap().unwrap(), expected);
    }

    #[test]
    fn test_wrong_and_blank_commands() {
        assert!(ConfigCommand::parse("   ").is_none());
        let err = ConfigCommand::parse("bpr=125").unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: Wrong command");
    }

    #[test]
    fn test_apply_commands() {
        let mut config = EmulatorConfig::default();
        config.apply(ConfigCommand::Bitrate(Bitrate::Kbps250));
        config.apply(ConfigCommand::IdWidth(IdWidth::Extended));
        config.apply(ConfigCommand::Help);

        assert_eq!(config.bitrate, Bitrate::Kbps250);
        assert_eq!(config.id_width, IdWidth::Extended);
    }
}
