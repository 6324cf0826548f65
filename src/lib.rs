//! devlink
//!
//! Host-side client for a custom device on a serial link: a fixed binary
//! frame protocol plus automatic discovery of the port the device is on.
//!
//! ## Architecture (Hexagonal / Ports & Adapters)
//!
//! - `domain/` - Pure domain types, config and errors, no I/O
//! - `ports/` - Trait definitions for the serial transport
//! - `frame/` - Frame codec (pure) and the connection session
//! - `adapters/` - Implementations of ports (serialport, simulated device)
//! - `discovery/` - Concurrent ping probing across candidate ports
//! - `controller` - Active session ownership, commands, device status
//! - `scheduler` - Periodic status polling
//! - `state` - Application context tying it together

// Core domain (pure, no I/O)
pub mod domain;
pub mod frame;
pub mod ports;

// Adapters (external I/O)
pub mod adapters;

// Link management
pub mod controller;
pub mod discovery;
pub mod scheduler;
pub mod state;

mod sync;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use adapters::mock_device::{MockDevice, MockDeviceFactory};
use controller::ControllerEvent;
use domain::{LinkConfig, LinkResult};
use state::DeviceContext;

/// Default run time of the binary, in seconds
const DEFAULT_RUN_SECS: u64 = 10;

/// Entry point of the `devlink` binary.
///
/// Environment:
/// - `DEVLINK_CONFIG`: path of a JSON `LinkConfig` (defaults otherwise)
/// - `MOCK_DEVICE=1`: use the simulated device instead of real ports
/// - `DEVLINK_RUN_SECS`: how long to print status updates
pub fn run() -> LinkResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::var("DEVLINK_CONFIG") {
        Ok(path) => LinkConfig::load(Path::new(&path))?,
        Err(_) => LinkConfig::default(),
    };
    let run_for = std::env::var("DEVLINK_RUN_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .map_or(Duration::from_secs(DEFAULT_RUN_SECS), Duration::from_secs);

    let context = if std::env::var("MOCK_DEVICE").is_ok_and(|v| v == "1") {
        log::info!("Using simulated device");
        let factory = MockDeviceFactory::new();
        factory.add_port("/dev/mock-silent", MockDevice::silent());
        factory.add_port("/dev/mock-device", MockDevice::responsive());
        DeviceContext::with_factory(config, Arc::new(factory))?
    } else {
        DeviceContext::new(config)?
    };

    let events = context.controller().subscribe();
    context.start()?;

    let deadline = Instant::now() + run_for;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(ControllerEvent::Status(status)) => {
                println!("{:.2} V  {:.1} °C", status.voltage, status.temperature);
            }
            Ok(ControllerEvent::Disconnected { port }) => println!("{port} disconnected"),
            Ok(ControllerEvent::Frame(_)) => {}
            Err(_) => break,
        }
    }

    context.shutdown();
    Ok(())
}
