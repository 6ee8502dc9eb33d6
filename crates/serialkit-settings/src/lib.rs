//! SerialKit Settings Crate
//!
//! Handles application configuration: the settings model, JSON/TOML
//! load and save, and validation.

pub mod config;
pub mod error;

pub use config::{
    BluetoothSettings, Config, NetworkSettings, PipelineSettings, SchedulerSettings,
    SimulatedSettings,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
