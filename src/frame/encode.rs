//! Pure encoding: type + payload → wire bytes.
//!
//! No I/O, no side effects. Easy to unit-test without any serial port.

use crate::domain::{LinkError, LinkResult};

use super::{CommandType, HEADER, MAX_PAYLOAD, TAIL};

/// 8-bit wrapping sum of type, length and payload.
///
/// Callers must have checked `payload.len() <= 255`.
pub fn checksum(frame_type: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(frame_type.wrapping_add(payload.len() as u8), |acc, b| {
            acc.wrapping_add(*b)
        })
}

/// Encode one frame. Fails only when the payload exceeds 255 bytes.
pub fn encode(frame_type: u8, payload: &[u8]) -> LinkResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::InvalidPayload(payload.len()));
    }

    let mut wire = Vec::with_capacity(super::FRAME_OVERHEAD + payload.len());
    wire.extend_from_slice(&HEADER);
    wire.push(frame_type);
    wire.push(payload.len() as u8);
    wire.extend_from_slice(payload);
    wire.push(checksum(frame_type, payload));
    wire.extend_from_slice(&TAIL);
    Ok(wire)
}

pub fn encode_command(cmd: CommandType, payload: &[u8]) -> LinkResult<Vec<u8>> {
    encode(cmd.code(), payload)
}
