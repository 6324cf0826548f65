//! Port traits (interfaces)
//!
//! These traits define the boundary between the protocol core and the
//! serial hardware. Adapters implement them for real ports and for the
//! simulated device.

pub mod serial;

pub use serial::*;
