//! # SerialKit Core
//!
//! Core types and utilities for SerialKit.
//! Provides the byte codec, the topic based event bus, the periodic timer
//! scheduler and the telemetry field table shared by the transport,
//! scripting and settings crates.

pub mod codec;
pub mod error;
pub mod event_bus;
pub mod scheduler;
pub mod telemetry;
pub mod types;

pub use error::{CodecError, Error, QueueError, Result, ScriptError, TransportError};

// Re-export event bus for convenience
pub use event_bus::{
    BusEvent, ConnectionEvent, ConnectionState, EventBus, EventBusConfig, Subscription,
    SubscriptionId, Topic,
};

pub use scheduler::Scheduler;
pub use telemetry::{FieldStore, FieldType, TelemetryField};

// Re-export type aliases for convenience
pub use types::{
    thread_safe, thread_safe_none, thread_safe_rw, ThreadSafe, ThreadSafeOption, ThreadSafeRw,
    TimerCallback,
};
