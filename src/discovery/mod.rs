//! Automatic discovery of the device's serial port

pub mod scanner;

pub use scanner::{filter_candidates, PortScanner, ScanHit};
