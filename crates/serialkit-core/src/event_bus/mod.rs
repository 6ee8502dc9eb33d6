//! # Event Bus Module
//!
//! Provides a topic based publish/subscribe bus decoupling producers
//! (transports, send pipeline, script sandbox) from consumers (log views,
//! charts, telemetry tables).
//!
//! ## Overview
//!
//! - Publishers emit [`BusEvent`]s without knowing subscribers
//! - Subscribers register per [`Topic`], optionally for a single delivery
//! - Async consumers can poll a broadcast receiver instead
//!
//! ## Usage
//!
//! ```rust,ignore
//! use serialkit_core::event_bus::{BusEvent, EventBus, Topic};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(Topic::IncomingData, |event| {
//!     if let BusEvent::IncomingData { text, .. } = event {
//!         println!("rx: {}", text);
//!     }
//! });
//!
//! bus.publish(BusEvent::IncomingData { raw: b"ok".to_vec(), text: "ok".into() });
//! subscription.unsubscribe();
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
