//! Error types for the settings crate.
//!
//! Loading and saving fail with [`SettingsError`]; a well-formed file with
//! unusable values fails validation with [`ConfigError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or saving configuration.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file extension is neither `.json` nor `.toml`.
    #[error("Unsupported config format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// No platform configuration directory is available.
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// The configuration failed validation.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors related to configuration validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value must be positive.
    #[error("'{key}' must be greater than zero")]
    Zero { key: &'static str },

    /// A value is outside its valid set.
    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: &'static str, value: String },
}

/// Result type alias for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Zero {
            key: "serial.baud_rate",
        };
        assert_eq!(err.to_string(), "'serial.baud_rate' must be greater than zero");

        let err = ConfigError::ValueOutOfRange {
            key: "serial.data_bits",
            value: "9".to_string(),
        };
        assert_eq!(err.to_string(), "Value out of range for 'serial.data_bits': 9");
    }

    #[test]
    fn test_error_conversion() {
        let err: SettingsError = ConfigError::Zero { key: "x" }.into();
        assert!(matches!(err, SettingsError::Config(_)));

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::IoError(_)));

        let err = SettingsError::UnsupportedFormat(PathBuf::from("config.yaml"));
        assert_eq!(err.to_string(), "Unsupported config format: config.yaml");
    }
}
