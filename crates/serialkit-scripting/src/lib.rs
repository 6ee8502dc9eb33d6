//! # SerialKit Scripting
//!
//! Sandboxed extension point for SerialKit sessions. User scripts are
//! written in [rhai](https://rhai.rs) and may reshape inbound and outbound
//! bytes, publish structured records and drive their own timers, through
//! a fixed set of capabilities and within engine resource limits.

pub mod engine;
pub mod host;
pub mod library;
pub mod runtime;

pub use engine::{parse_fields, ScriptLimits};
pub use host::ScriptHost;
pub use library::{ScriptItem, ScriptLibrary, IMU_DEMO, SCRIPTS_STORAGE_KEY};
pub use runtime::{ScriptContext, ScriptRuntime};
