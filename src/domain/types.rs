//! Core domain types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{LinkError, LinkResult};

/// Serial line speed. Only the rates the device firmware supports are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    /// Time to clock `bytes` bytes over the line at 8N1 (10 bits per byte)
    pub fn transfer_time(self, bytes: usize) -> Duration {
        let bits = bytes as u64 * 10;
        Duration::from_micros(bits * 1_000_000 / u64::from(self.as_u32()))
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = LinkError;

    fn try_from(rate: u32) -> LinkResult<Self> {
        BaudRate::ALL
            .into_iter()
            .find(|b| b.as_u32() == rate)
            .ok_or_else(|| {
                LinkError::Config(format!(
                    "Unsupported baud rate {rate}; expected one of 9600, 19200, 38400, 57600, 115200"
                ))
            })
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> u32 {
        rate.as_u32()
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Last known device readings, decoded from a ReturnStatus payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Supply voltage in volts
    pub voltage: f32,
    /// Board temperature in °C
    pub temperature: f32,
}

impl DeviceStatus {
    /// Wire size of a ReturnStatus payload
    pub const PAYLOAD_LEN: usize = 8;

    /// Decode two little-endian f32s (voltage, temperature).
    ///
    /// Returns `None` unless the payload is exactly 8 bytes.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::PAYLOAD_LEN {
            return None;
        }
        let voltage = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let temperature = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Some(Self {
            voltage,
            temperature,
        })
    }

    pub fn to_payload(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.voltage.to_le_bytes());
        out[4..].copy_from_slice(&self.temperature.to_le_bytes());
        out
    }
}

/// Information about a serial port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub name: String,
    pub port_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_baud_rates_convert() {
        for rate in [9600u32, 19200, 38400, 57600, 115200] {
            assert_eq!(BaudRate::try_from(rate).unwrap().as_u32(), rate);
        }
    }

    #[test]
    fn transfer_time_scales_with_baud_rate() {
        assert_eq!(
            BaudRate::B9600.transfer_time(255),
            Duration::from_micros(265_625)
        );
        assert_eq!(BaudRate::B115200.transfer_time(0), Duration::ZERO);
        assert!(BaudRate::B115200.transfer_time(255) < Duration::from_millis(25));
    }

    #[test]
    fn unsupported_baud_rate_is_config_error() {
        for rate in [0u32, 4800, 14400, 230400] {
            assert!(matches!(BaudRate::try_from(rate), Err(LinkError::Config(_))));
        }
    }

    #[test]
    fn status_decodes_little_endian_floats() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&3.30f32.to_le_bytes());
        payload.extend_from_slice(&25.5f32.to_le_bytes());

        let status = DeviceStatus::from_payload(&payload).unwrap();
        assert!((status.voltage - 3.30).abs() < f32::EPSILON);
        assert!((status.temperature - 25.5).abs() < f32::EPSILON);
    }

    #[test]
    fn status_rejects_wrong_length() {
        assert!(DeviceStatus::from_payload(&[0; 7]).is_none());
        assert!(DeviceStatus::from_payload(&[0; 9]).is_none());
    }

    #[test]
    fn default_status_is_zeroed() {
        let status = DeviceStatus::default();
        assert_eq!(status.voltage, 0.0);
        assert_eq!(status.temperature, 0.0);
    }

    #[test]
    fn baud_rate_serializes_as_number() {
        let json = serde_json::to_string(&BaudRate::B57600).unwrap();
        assert_eq!(json, "57600");
        assert!(serde_json::from_str::<BaudRate>("1200").is_err());
    }
}
