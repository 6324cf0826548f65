//! Application context
//!
//! Everything the host application needs to talk to the device, created
//! once at startup and shut down explicitly (or on drop).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adapters::serial_port::SerialPortFactory;
use crate::controller::DeviceController;
use crate::domain::{LinkConfig, LinkResult};
use crate::ports::SerialFactory;
use crate::scheduler::StatusPoller;
use crate::sync::lock;

/// Owns the controller and the status poller
pub struct DeviceContext {
    controller: Arc<DeviceController>,
    poller: Mutex<Option<StatusPoller>>,
}

impl DeviceContext {
    /// Context over the system's real serial ports
    pub fn new(config: LinkConfig) -> LinkResult<Self> {
        Self::with_factory(config, Arc::new(SerialPortFactory))
    }

    pub fn with_factory(config: LinkConfig, factory: Arc<dyn SerialFactory>) -> LinkResult<Self> {
        Ok(Self {
            controller: Arc::new(DeviceController::new(factory, config)?),
            poller: Mutex::new(None),
        })
    }

    pub fn controller(&self) -> &Arc<DeviceController> {
        &self.controller
    }

    pub fn config(&self) -> &LinkConfig {
        self.controller.config()
    }

    /// Connect to the configured port, or scan for the device if none is set,
    /// then start status polling if enabled.
    ///
    /// Returns the connected port. Finding no device is not an error.
    pub fn start(&self) -> LinkResult<Option<String>> {
        let config = self.controller.config();
        let port = match &config.port {
            Some(port) => {
                self.controller.connect(port)?;
                Some(port.clone())
            }
            None => self.controller.scan_available()?,
        };
        match &port {
            Some(port) => log::info!("Device ready on {port}"),
            None => log::warn!("No device found"),
        }

        if let Some(ms) = config.status_poll_interval_ms {
            let poller = StatusPoller::start(
                Arc::clone(&self.controller),
                Duration::from_millis(ms),
                config.rescan_when_disconnected,
            )?;
            if let Some(mut previous) = lock(&self.poller).replace(poller) {
                previous.stop();
            }
        }
        Ok(port)
    }

    /// Stop polling and close the device link. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let poller = lock(&self.poller).take();
        if let Some(mut poller) = poller {
            poller.stop();
        }
        self.controller.disconnect();
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_device::{MockDevice, MockDeviceFactory};

    fn config() -> LinkConfig {
        LinkConfig {
            read_timeout_ms: 10,
            status_poll_interval_ms: None,
            ..LinkConfig::default()
        }
    }

    #[test]
    fn start_connects_to_configured_port() {
        let factory = Arc::new(MockDeviceFactory::new());
        factory.add_port("A", MockDevice::responsive());
        factory.add_port("B", MockDevice::responsive());
        let config = LinkConfig {
            port: Some("B".to_string()),
            ..config()
        };
        let context = DeviceContext::with_factory(config, factory.clone()).unwrap();

        assert_eq!(context.start().unwrap().as_deref(), Some("B"));
        assert_eq!(factory.open_count("A"), 0);
        context.shutdown();
        assert_eq!(factory.open_handles("B"), 0);
    }

    #[test]
    fn start_scans_without_configured_port() {
        let factory = Arc::new(MockDeviceFactory::new());
        factory.add_port("A", MockDevice::silent());
        factory.add_port("B", MockDevice::responsive());
        let context = DeviceContext::with_factory(config(), factory.clone()).unwrap();

        assert_eq!(context.start().unwrap().as_deref(), Some("B"));
        assert!(context.controller().is_connected());
        drop(context);
        assert_eq!(factory.open_handles("B"), 0);
    }

    #[test]
    fn start_with_missing_configured_port_fails() {
        let factory = Arc::new(MockDeviceFactory::new());
        let config = LinkConfig {
            port: Some("gone".to_string()),
            ..config()
        };
        let context = DeviceContext::with_factory(config, factory).unwrap();
        assert!(context.start().is_err());
    }

    #[test]
    fn no_device_is_not_an_error() {
        let factory = Arc::new(MockDeviceFactory::new());
        let context = DeviceContext::with_factory(config(), factory).unwrap();
        assert_eq!(context.start().unwrap(), None);
        assert!(!context.controller().is_connected());
    }
}
