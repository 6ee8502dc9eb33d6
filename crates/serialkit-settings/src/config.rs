//! Configuration for SerialKit
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Serial line parameters, passed unmodified to transports
//! - Send pipeline (queue capacity, pacing, checksum)
//! - Simulated IMU cadence
//! - Network endpoints and Bluetooth scan duration
//! - Scheduler resolution
//! - Console log line format

use serde::{Deserialize, Serialize};
use serialkit_communication::pipeline::{DEFAULT_PACING, DEFAULT_QUEUE_CAPACITY};
use serialkit_communication::{ConnectionParams, SendPipelineConfig};
use serialkit_core::codec::LogFormat;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// Directory name under the platform config directory
pub const CONFIG_DIR_NAME: &str = "serialkit";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Send pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum queued payloads
    pub queue_capacity: usize,
    /// Delay between writes in milliseconds
    pub pacing_ms: u64,
    /// Append an XOR checksum byte to every payload
    pub checksum: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pacing_ms: DEFAULT_PACING.as_millis() as u64,
            checksum: false,
        }
    }
}

/// Simulated device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedSettings {
    /// Offer the simulated IMU during discovery
    pub enabled: bool,
    /// Emission interval in milliseconds
    pub interval_ms: u64,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 50,
        }
    }
}

/// Network transport settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// `host:port` endpoints offered during discovery
    pub endpoints: Vec<String>,
}

/// Bluetooth transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothSettings {
    /// How long a scan runs, in milliseconds
    pub scan_duration_ms: u64,
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            scan_duration_ms: 3000,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Driver tick resolution in milliseconds
    pub resolution_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { resolution_ms: 5 }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line parameters
    pub serial: ConnectionParams,
    /// Send pipeline
    pub pipeline: PipelineSettings,
    /// Simulated IMU
    pub simulated: SimulatedSettings,
    /// TCP endpoints
    pub network: NetworkSettings,
    /// Bluetooth LE
    pub bluetooth: BluetoothSettings,
    /// Timer driver
    pub scheduler: SchedulerSettings,
    /// Console log lines
    pub log_format: LogFormat,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        _ => Err(SettingsError::UnsupportedFormat(path.to_path_buf())),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location, `<config dir>/serialkit/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory(
                    "no configuration directory on this platform".to_string(),
                )
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load config from file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        fn positive(key: &'static str, value: u64) -> ConfigResult<()> {
            if value == 0 {
                return Err(ConfigError::Zero { key });
            }
            Ok(())
        }

        positive("serial.baud_rate", self.serial.baud_rate.into())?;
        positive("serial.connect_timeout_ms", self.serial.connect_timeout_ms)?;
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(ConfigError::ValueOutOfRange {
                key: "serial.data_bits",
                value: self.serial.data_bits.to_string(),
            });
        }
        if !(1..=2).contains(&self.serial.stop_bits) {
            return Err(ConfigError::ValueOutOfRange {
                key: "serial.stop_bits",
                value: self.serial.stop_bits.to_string(),
            });
        }

        positive("pipeline.queue_capacity", self.pipeline.queue_capacity as u64)?;
        positive("simulated.interval_ms", self.simulated.interval_ms)?;
        positive("bluetooth.scan_duration_ms", self.bluetooth.scan_duration_ms)?;
        positive("scheduler.resolution_ms", self.scheduler.resolution_ms)?;

        for endpoint in &self.network.endpoints {
            let valid = endpoint
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(ConfigError::ValueOutOfRange {
                    key: "network.endpoints",
                    value: endpoint.clone(),
                });
            }
        }

        Ok(())
    }

    /// Send pipeline configuration
    pub fn pipeline_config(&self) -> SendPipelineConfig {
        SendPipelineConfig {
            capacity: self.pipeline.queue_capacity,
            pacing: Duration::from_millis(self.pipeline.pacing_ms),
            checksum: self.pipeline.checksum,
        }
    }

    /// Simulated IMU emission interval
    pub fn simulated_interval(&self) -> Duration {
        Duration::from_millis(self.simulated.interval_ms)
    }

    /// Bluetooth scan duration
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.bluetooth.scan_duration_ms)
    }

    /// Scheduler driver resolution
    pub fn scheduler_resolution(&self) -> Duration {
        Duration::from_millis(self.scheduler.resolution_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.pipeline_config(), SendPipelineConfig::default());
        assert_eq!(config.simulated_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                key: "serial.baud_rate"
            })
        );

        let mut config = Config::default();
        config.serial.data_bits = 9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValueOutOfRange { key: "serial.data_bits", .. })
        ));

        let mut config = Config::default();
        config.serial.stop_bits = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulated.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.endpoints = vec!["localhost".to_string()];
        assert!(config.validate().is_err());
        config.network.endpoints = vec!["localhost:2323".to_string(), "[::1]:80".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
                [serial]
                baud_rate = 9600
                parity = "even"

                [pipeline]
                checksum = true
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.data_bits, 8);
        assert!(config.pipeline_config().checksum);
        assert_eq!(config.pipeline.queue_capacity, 1000);
        assert_eq!(config.log_format, LogFormat::default());
    }
}
