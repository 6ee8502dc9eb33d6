//! Byte/text/hex conversion and checksum framing
//!
//! The canonical hex form is uppercase, space separated byte pairs
//! (`"0A FF 10"`). Checksum framing is a single trailing byte holding the
//! XOR fold of every preceding byte.

use crate::error::CodecError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Check that `text` holds only hex digits and whitespace, with an even
/// digit count once whitespace is removed.
pub fn is_valid_hex(text: &str) -> bool {
    let mut digits = 0usize;
    for c in text.chars() {
        if c.is_ascii_hexdigit() {
            digits += 1;
        } else if !c.is_whitespace() {
            return false;
        }
    }
    digits % 2 == 0
}

/// Convert text to bytes.
///
/// With `as_hex` the text is parsed as hex pairs and rejected with
/// [`CodecError::InvalidHexFormat`] when malformed; otherwise it is UTF-8
/// encoded.
pub fn encode(text: &str, as_hex: bool) -> Result<Vec<u8>, CodecError> {
    if !as_hex {
        return Ok(text.as_bytes().to_vec());
    }

    if !is_valid_hex(text) {
        return Err(CodecError::InvalidHexFormat {
            input: text.to_string(),
        });
    }

    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|_| CodecError::InvalidHexFormat {
        input: text.to_string(),
    })
}

/// Best-effort UTF-8 decode. Invalid sequences become U+FFFD.
pub fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            tracing::debug!("Lossy decode of {} bytes: {}", bytes.len(), e);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Render bytes as uppercase, space separated pairs.
pub fn to_hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// XOR fold of every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Copy of `bytes` with its checksum appended as a trailing byte.
pub fn append_checksum(bytes: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(bytes.len() + 1);
    framed.extend_from_slice(bytes);
    framed.push(checksum(bytes));
    framed
}

/// Compare the trailing byte against the checksum of the rest.
///
/// Empty input is never valid.
pub fn verify_checksum(frame: &[u8]) -> bool {
    split_checksum(frame).is_ok()
}

/// Validate a checksum-framed buffer and return its payload.
pub fn split_checksum(frame: &[u8]) -> Result<&[u8], CodecError> {
    let (actual, payload) = frame.split_last().ok_or(CodecError::EmptyFrame)?;
    let expected = checksum(payload);
    if expected == *actual {
        Ok(payload)
    } else {
        Err(CodecError::ChecksumMismatch {
            expected,
            actual: *actual,
        })
    }
}

/// Display options for a console log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFormat {
    /// Prefix the line with the local wall clock time
    pub show_time: bool,
    /// Include milliseconds in the timestamp
    pub show_ms: bool,
    /// Include the hex rendering
    pub show_hex: bool,
    /// Include the decoded text
    pub show_text: bool,
    /// Terminate the line with a newline
    pub show_newline: bool,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            show_time: true,
            show_ms: false,
            show_hex: false,
            show_text: true,
            show_newline: false,
        }
    }
}

/// Format a chunk for a console view.
///
/// Parts are joined by single spaces: `[12:00:01.042] 68 69 | hi`.
pub fn format_log_line(bytes: &[u8], format: &LogFormat, timestamp: DateTime<Local>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4);

    if format.show_time {
        if format.show_ms {
            parts.push(format!("[{}]", timestamp.format("%H:%M:%S%.3f")));
        } else {
            parts.push(format!("[{}]", timestamp.format("%H:%M:%S")));
        }
    }

    if format.show_hex {
        parts.push(to_hex_string(bytes));
    }

    if format.show_text {
        let text = decode(bytes);
        if format.show_hex {
            parts.push(format!("| {}", text));
        } else {
            parts.push(text);
        }
    }

    let mut line = parts.join(" ");
    if format.show_newline {
        line.push('\n');
    }
    line
}
