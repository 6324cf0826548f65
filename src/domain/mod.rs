//! Core domain types
//!
//! Pure types with no I/O dependencies: errors, configuration, baud rates
//! and decoded device status.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
