//! Error handling for SerialKit
//!
//! Provides error types for all layers of the pipeline:
//! - Transport errors (device selection, open, link I/O)
//! - Queue errors (outbound send rejection)
//! - Codec errors (hex parsing, checksum framing)
//! - Script errors (sandbox compile/execution failures)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport error type
///
/// Represents errors raised while selecting, opening or talking to a device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The operator declined the device selection prompt.
    ///
    /// Transports translate this into `Ok(None)` from `request`; it only
    /// surfaces as an error from selector implementations.
    #[error("Device selection cancelled")]
    SelectionCancelled,

    /// The authorization step failed for a reason other than cancellation
    #[error("Device request failed for {kind}: {reason}")]
    RequestFailed {
        /// The transport kind that was asked for a device.
        kind: String,
        /// The reason the request failed.
        reason: String,
    },

    /// The endpoint could not be opened
    #[error("Failed to open {device}: {reason}")]
    OpenFailed {
        /// The id of the device that failed to open.
        device: String,
        /// The underlying cause.
        reason: String,
    },

    /// No connection is open
    #[error("Not connected")]
    NotConnected,

    /// A connection is already open or being opened
    #[error("Already connected to {device}")]
    AlreadyConnected {
        /// The id of the device currently attached.
        device: String,
    },

    /// The device id is not known to the registry
    #[error("Unknown device: {id}")]
    UnknownDevice {
        /// The unknown device id.
        id: String,
    },

    /// The device handle does not belong to this transport
    #[error("Device {device} cannot be opened by the {transport} transport")]
    WrongTransport {
        /// The id of the device.
        device: String,
        /// The transport that was asked to open it.
        transport: String,
    },

    /// Link level read/write failure
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },
}

impl TransportError {
    /// Build an `OpenFailed` error from any displayable cause
    pub fn open_failed(device: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        TransportError::OpenFailed {
            device: device.into(),
            reason: cause.to_string(),
        }
    }

    /// Build an `Io` error from any displayable cause
    pub fn io(cause: impl std::fmt::Display) -> Self {
        TransportError::Io {
            reason: cause.to_string(),
        }
    }
}

/// Send queue error type
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The connection is not open, nothing was queued
    #[error("Cannot queue data: not connected")]
    NotConnected,

    /// The queue is at capacity, nothing was queued
    #[error("Send queue is full ({capacity} items)")]
    QueueFull {
        /// The configured queue capacity.
        capacity: usize,
    },
}

/// Codec error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Hex text contains non-hex characters or an odd number of digits
    #[error("Invalid hex format: {input:?}")]
    InvalidHexFormat {
        /// The rejected input.
        input: String,
    },

    /// Trailing checksum byte does not match the payload
    #[error("Checksum mismatch: expected {expected:#04X}, got {actual:#04X}")]
    ChecksumMismatch {
        /// Checksum computed over the payload.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },

    /// Frame too short to carry a checksum
    #[error("Frame is empty, no checksum byte present")]
    EmptyFrame,
}

/// Script sandbox error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The script failed to parse
    #[error("Script compile error: {message}")]
    Compile {
        /// The parser message.
        message: String,
    },

    /// A hook, timer callback or top-level statement raised an error
    #[error("Script execution error in {context}: {message}")]
    Execution {
        /// Where the error happened (`on_receive`, `timer tick`, ...).
        context: String,
        /// The engine message.
        message: String,
    },

    /// A hook returned something other than bytes, text or unit
    #[error("Hook {hook} returned unsupported type {type_name}")]
    InvalidReturn {
        /// The hook name.
        hook: String,
        /// The rhai type name of the returned value.
        type_name: String,
    },

    /// The runtime has been stopped
    #[error("Script is not running")]
    NotRunning,
}

/// Main error type for SerialKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Codec error
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Script error
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is the user declining a device prompt
    pub fn is_selection_cancelled(&self) -> bool {
        matches!(self, Error::Transport(TransportError::SelectionCancelled))
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is a queue error
    pub fn is_queue_error(&self) -> bool {
        matches!(self, Error::Queue(_))
    }

    /// Check if this is a codec error
    pub fn is_codec_error(&self) -> bool {
        matches!(self, Error::Codec(_))
    }

    /// Check if this is a script error
    pub fn is_script_error(&self) -> bool {
        matches!(self, Error::Script(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
