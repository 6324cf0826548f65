//! Binary frame protocol.
//!
//! Wire format:
//!
//! ```text
//! AA 55 | type | length | payload[length] | checksum | 0D 0A
//! ```
//!
//! `checksum` is the 8-bit wrapping sum of `type`, `length` and every
//! payload byte.
//!
//! This module separates the three concerns of talking to the device:
//! - `encode`: command + payload → wire bytes (pure, no I/O)
//! - `decode`: byte source → validated frame (no side effects beyond the reads)
//! - `session`: own the serial port, run the decode thread, serialize writes

pub mod decode;
pub mod encode;
pub mod session;

pub use decode::{decode, decode_bytes, decode_with, SliceSource};
pub use encode::{checksum, encode, encode_command};
pub use session::{ConnectionSession, SessionEvent, SessionState};

use crate::domain::ProtocolError;

/// Start-of-frame marker
pub const HEADER: [u8; 2] = [0xAA, 0x55];

/// End-of-frame marker
pub const TAIL: [u8; 2] = [0x0D, 0x0A];

/// Largest payload a single frame can carry
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Bytes a frame occupies on the wire besides its payload
pub const FRAME_OVERHEAD: usize = 7;

/// Host → device commands.
///
/// `0x01` was called "PointInfo" in earlier protocol revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    /// Payload: little-endian f32 set-point
    SetPoint = 0x01,
    /// Payload: one byte, `0x01` enable / `0x00` disable
    EnableDisable = 0x02,
    GetStatus = 0x03,
    /// Payload: challenge bytes the device must echo back
    Ping = 0x04,
}

impl CommandType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::SetPoint),
            0x02 => Some(Self::EnableDisable),
            0x03 => Some(Self::GetStatus),
            0x04 => Some(Self::Ping),
            _ => None,
        }
    }
}

/// Device → host responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseType {
    Ack = 0x80,
    Nack = 0x81,
    /// Payload: LE f32 voltage, LE f32 temperature
    ReturnStatus = 0x82,
    /// Payload: echo of the ping payload
    PingAck = 0x83,
    /// Payload byte 0: device error code
    Error = 0xFF,
}

impl ResponseType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x80 => Some(Self::Ack),
            0x81 => Some(Self::Nack),
            0x82 => Some(Self::ReturnStatus),
            0x83 => Some(Self::PingAck),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// One validated frame. Header, checksum and tail are implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type byte; unknown codes are kept rather than rejected
    pub frame_type: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    pub fn response(&self) -> Option<ResponseType> {
        ResponseType::from_code(self.frame_type)
    }

    pub fn command(&self) -> Option<CommandType> {
        CommandType::from_code(self.frame_type)
    }

    /// Error code carried by an Error frame
    pub fn error_code(&self) -> Option<u8> {
        match self.response() {
            Some(ResponseType::Error) => self.payload.first().copied(),
            _ => None,
        }
    }
}

/// Result of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Frame(Frame),
    /// Nothing arrived before the read timeout; the normal idle state
    NoData,
    /// Bytes arrived but did not form a valid frame
    Malformed(ProtocolError),
}

/// Payload for a SetPoint command
pub fn set_point_payload(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Payload for an EnableDisable command
pub fn enable_payload(enabled: bool) -> [u8; 1] {
    [u8::from(enabled)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_match_wire_values() {
        assert_eq!(CommandType::SetPoint.code(), 0x01);
        assert_eq!(CommandType::EnableDisable.code(), 0x02);
        assert_eq!(CommandType::GetStatus.code(), 0x03);
        assert_eq!(CommandType::Ping.code(), 0x04);
    }

    #[test]
    fn response_codes_roundtrip() {
        for code in [0x80u8, 0x81, 0x82, 0x83, 0xFF] {
            assert_eq!(ResponseType::from_code(code).unwrap().code(), code);
        }
        assert!(ResponseType::from_code(0x84).is_none());
        assert!(CommandType::from_code(0x00).is_none());
    }

    #[test]
    fn error_code_only_for_error_frames() {
        assert_eq!(Frame::new(0xFF, vec![0x07]).error_code(), Some(0x07));
        assert_eq!(Frame::new(0xFF, Vec::new()).error_code(), None);
        assert_eq!(Frame::new(0x80, vec![0x07]).error_code(), None);
    }

    #[test]
    fn enable_payload_is_single_flag_byte() {
        assert_eq!(enable_payload(true), [0x01]);
        assert_eq!(enable_payload(false), [0x00]);
    }
}
