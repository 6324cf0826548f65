//! Periodic status polling
//!
//! A dedicated thread wakes on a fixed monotonic schedule and asks the
//! controller for a ReturnStatus. Ticks are computed from the start time,
//! not from when the previous tick finished, so a slow write does not make
//! the schedule drift. Dropping the stop sender cancels the sleep at once.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::controller::DeviceController;
use crate::domain::{LinkError, LinkResult};

pub struct StatusPoller {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    /// Start polling every `interval`.
    ///
    /// With `rescan_when_disconnected`, a tick that finds no open session
    /// scans the available ports instead of sending GetStatus.
    pub fn start(
        controller: Arc<DeviceController>,
        interval: Duration,
        rescan_when_disconnected: bool,
    ) -> LinkResult<Self> {
        if interval.is_zero() {
            return Err(LinkError::Config(
                "Status poll interval must be greater than zero".to_string(),
            ));
        }
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("status-poller".to_string())
            .spawn(move || run(controller, interval, rescan_when_disconnected, stopped))
            .map_err(|e| LinkError::Io(format!("Failed to spawn status poller: {e}")))?;
        log::debug!("Status poller started ({interval:?})");
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Cancel polling and wait for the thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Status poller panicked");
            }
            log::debug!("Status poller stopped");
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    controller: Arc<DeviceController>,
    interval: Duration,
    rescan_when_disconnected: bool,
    stopped: Receiver<()>,
) {
    let mut next_tick = Instant::now() + interval;
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match stopped.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }

        if controller.is_connected() {
            controller.request_status();
        } else if rescan_when_disconnected {
            match controller.scan_available() {
                Ok(Some(port)) => log::info!("Reconnected on {port}"),
                Ok(None) => {}
                Err(e) => log::warn!("Rescan failed: {e}"),
            }
        }

        next_tick += interval;
        // After a long stall (e.g. a rescan) skip the missed ticks.
        let now = Instant::now();
        if next_tick < now {
            next_tick = now + interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_device::{MockDevice, MockDeviceFactory};
    use crate::controller::ControllerEvent;
    use crate::domain::LinkConfig;
    use crate::ports::SerialFactory;

    fn controller(factory: &Arc<MockDeviceFactory>) -> Arc<DeviceController> {
        let config = LinkConfig {
            read_timeout_ms: 10,
            ..LinkConfig::default()
        };
        Arc::new(
            DeviceController::new(Arc::clone(factory) as Arc<dyn SerialFactory>, config).unwrap(),
        )
    }

    #[test]
    fn zero_interval_is_rejected() {
        let factory = Arc::new(MockDeviceFactory::new());
        assert!(matches!(
            StatusPoller::start(controller(&factory), Duration::ZERO, false),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn polls_status_while_connected() {
        let factory = Arc::new(MockDeviceFactory::new());
        factory.add_port("A", MockDevice::responsive());
        let controller = controller(&factory);
        controller.connect("A").unwrap();
        let rx = controller.subscribe();

        let mut poller =
            StatusPoller::start(Arc::clone(&controller), Duration::from_millis(20), false)
                .unwrap();
        let mut updates = 0;
        while updates < 2 {
            if let ControllerEvent::Status(_) = rx.recv_timeout(Duration::from_secs(1)).unwrap() {
                updates += 1;
            }
        }
        poller.stop();
        poller.stop();
        assert!((controller.last_status().voltage - 3.3).abs() < 1e-6);
    }

    #[test]
    fn stop_returns_promptly_with_long_interval() {
        let factory = Arc::new(MockDeviceFactory::new());
        let poller =
            StatusPoller::start(controller(&factory), Duration::from_secs(60), false).unwrap();
        let started = Instant::now();
        drop(poller);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn rescans_when_disconnected() {
        let factory = Arc::new(MockDeviceFactory::new());
        factory.add_port("A", MockDevice::responsive());
        let controller = controller(&factory);
        assert!(!controller.is_connected());

        let _poller =
            StatusPoller::start(Arc::clone(&controller), Duration::from_millis(20), true).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !controller.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(controller.active_port().as_deref(), Some("A"));
    }
}
