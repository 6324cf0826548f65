//! Adapters: implementations of the port traits
//!
//! - `serial_port` — real hardware through the `serialport` crate
//! - `mock_device` — an in-memory simulated device

pub mod mock_device;
pub mod serial_port;
