//! # SerialKit
//!
//! Transport abstraction and streaming data pipeline for byte-oriented
//! devices: serial ports, USB serial adapters, Bluetooth LE, TCP endpoints
//! and a simulated IMU.
//!
//! ## Architecture
//!
//! SerialKit is organized as a workspace with multiple crates:
//!
//! 1. **serialkit-core** - Codec, event bus, timer scheduler, telemetry fields, errors
//! 2. **serialkit-communication** - Transports, send pipeline, session, registry, quick send
//! 3. **serialkit-scripting** - Rhai script runtime with data hooks and timers
//! 4. **serialkit-settings** - TOML/JSON configuration
//! 5. **serialkit** - Service wiring and the headless binary
//!
//! ## Data flow
//!
//! Inbound chunks pass through the active script's `on_receive` hook and
//! are published on `incoming-data`. Outbound payloads are queued, passed
//! through `on_send`, optionally checksummed, written with pacing and
//! published on `outgoing-data`. Scripts publish parsed records on
//! `user-data`, which the telemetry field store consumes.

pub mod app;

pub use app::App;

pub use serialkit_core::{
    codec, BusEvent, ConnectionEvent, ConnectionState, Error, EventBus, FieldStore, Result,
    Scheduler, Subscription, TelemetryField, Topic,
};

pub use serialkit_communication::{
    ConnectionParams, ConnectionRegistry, Device, DeviceKind, QuickSendItem, QuickSendStore,
    QuickSender, SendPipeline, SendPipelineConfig, Session,
};

pub use serialkit_scripting::{ScriptHost, ScriptLibrary, ScriptRuntime, IMU_DEMO};

pub use serialkit_settings::{Config, ConfigError, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Sets up structured console logging filtered by `RUST_LOG`, defaulting
/// to `info`. Calling it twice is an error.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
