//! Domain error types

use thiserror::Error;

/// Reasons a frame on the wire was rejected by the decoder.
///
/// These are never fatal to a session: the malformed frame is dropped and
/// decoding resumes with whatever bytes follow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Header mismatch: got {0:02X?}")]
    HeaderMismatch([u8; 2]),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Tail mismatch: got {0:02X?}")]
    TailMismatch([u8; 2]),

    #[error("Frame truncated: read timed out mid-frame")]
    Truncated,
}

/// Errors that can occur while talking to the device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serial I/O error: {0}")]
    Io(String),

    #[error("Invalid payload: {0} bytes exceeds the 255 byte limit")]
    InvalidPayload(usize),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session closed")]
    Closed,

    #[error("No device connected")]
    NotConnected,
}

impl LinkError {
    /// Fatal errors end a session; everything else leaves it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Io(_) | LinkError::Closed)
    }
}

/// Result type alias for device link operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_not_fatal() {
        assert!(!LinkError::Timeout("write".into()).is_fatal());
        assert!(!LinkError::Protocol(ProtocolError::Truncated).is_fatal());
        assert!(!LinkError::InvalidPayload(300).is_fatal());
        assert!(LinkError::Io("gone".into()).is_fatal());
    }

    #[test]
    fn checksum_mismatch_message_shows_both_bytes() {
        let msg = ProtocolError::ChecksumMismatch {
            expected: 0x04,
            actual: 0x05,
        }
        .to_string();
        assert!(msg.contains("0x04"));
        assert!(msg.contains("0x05"));
    }
}
