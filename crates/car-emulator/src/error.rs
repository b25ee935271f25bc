//! Emulator error types

use thiserror::Error;

/// Request decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObdError {
    /// A request needs at least the service and PID bytes
    #[error("Request length {0} is shorter than service and PID")]
    RequestTooShort(usize),

    /// Single-frame requests carry at most 7 bytes
    #[error("Request length {0} exceeds 7 bytes")]
    RequestTooLong(usize),

    #[error("VIN must be {expected} ASCII characters, got {actual}")]
    InvalidVin { expected: usize, actual: usize },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
