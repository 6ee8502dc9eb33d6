//! Event type definitions for the event bus.
//!
//! Every event belongs to exactly one [`Topic`]. Events are cloneable and
//! serializable so consumers can log or replay them.

use serde::{Deserialize, Serialize};

/// Named topic an event is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Inbound chunk after the receive hook
    IncomingData,
    /// Outbound chunk as written to the transport
    OutgoingData,
    /// Script sandbox failure
    ScriptError,
    /// Structured payload published by script logic
    UserData,
    /// Connection lifecycle and link errors
    Connection,
}

impl Topic {
    /// Wire name of the topic
    pub fn name(&self) -> &'static str {
        match self {
            Topic::IncomingData => "incoming-data",
            Topic::OutgoingData => "outgoing-data",
            Topic::ScriptError => "script-error",
            Topic::UserData => "user-data",
            Topic::Connection => "connection",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Disconnected,
    /// Transport is opening the endpoint
    Connecting,
    /// Reader and writer are live
    Open,
    /// Deliberate teardown in progress
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

/// Connection events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// State transition
    StateChanged {
        /// Device the session is attached to
        device: Option<String>,
        /// State before the transition
        from: ConnectionState,
        /// State after the transition
        to: ConnectionState,
    },
    /// Link failure while open
    LinkError {
        /// Device id
        device: String,
        /// Failure description
        reason: String,
    },
}

/// Root event enum, one case per topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusEvent {
    /// Inbound chunk with its decoded text
    IncomingData {
        /// Bytes after the receive hook
        raw: Vec<u8>,
        /// Best-effort text decoding of `raw`
        text: String,
    },
    /// Bytes actually written to the transport
    OutgoingData {
        /// Written bytes
        raw: Vec<u8>,
    },
    /// Script failure message
    ScriptError {
        /// Human readable message
        message: String,
    },
    /// Arbitrary structured payload from script logic
    UserData(serde_json::Value),
    /// Connection lifecycle
    Connection(ConnectionEvent),
}

impl BusEvent {
    /// Get the topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::IncomingData { .. } => Topic::IncomingData,
            BusEvent::OutgoingData { .. } => Topic::OutgoingData,
            BusEvent::ScriptError { .. } => Topic::ScriptError,
            BusEvent::UserData(_) => Topic::UserData,
            BusEvent::Connection(_) => Topic::Connection,
        }
    }

    /// Short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            BusEvent::IncomingData { raw, .. } => format!("Received {} bytes", raw.len()),
            BusEvent::OutgoingData { raw } => format!("Sent {} bytes", raw.len()),
            BusEvent::ScriptError { message } => format!("Script error: {}", message),
            BusEvent::UserData(_) => "User data".to_string(),
            BusEvent::Connection(ConnectionEvent::StateChanged { from, to, .. }) => {
                format!("Connection {} -> {}", from, to)
            }
            BusEvent::Connection(ConnectionEvent::LinkError { device, reason }) => {
                format!("Link error on {}: {}", device, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topics() {
        let event = BusEvent::OutgoingData { raw: vec![1, 2] };
        assert_eq!(event.topic(), Topic::OutgoingData);
        assert_eq!(event.topic().name(), "outgoing-data");
        assert_eq!(event.description(), "Sent 2 bytes");

        let event = BusEvent::UserData(serde_json::json!({ "pitch": 0.12 }));
        assert_eq!(event.topic().to_string(), "user-data");
    }
}
