//! DeviceController: the host-side owner of the device link.
//!
//! Holds at most one active session, issues commands on it and keeps the
//! last reported `DeviceStatus`. A dispatch thread per session turns
//! decoded frames into `ControllerEvent`s.
//!
//! Replacing the session (`adopt`, `connect`, a successful scan) closes the
//! old session and joins its dispatcher before the new one is installed, so
//! a frame is always attributed to the session that decoded it.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::discovery::PortScanner;
use crate::domain::{BaudRate, DeviceStatus, LinkConfig, LinkError, LinkResult, ScanConfig};
use crate::frame::{
    enable_payload, set_point_payload, CommandType, ConnectionSession, Frame, ResponseType,
    SessionEvent,
};
use crate::ports::SerialFactory;
use crate::sync::{broadcast, lock};

/// What controller subscribers receive
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Every frame decoded on the active session
    Frame(Frame),
    /// A valid ReturnStatus replaced the last known status
    Status(DeviceStatus),
    /// The session on `port` closed; no more frames from it
    Disconnected { port: String },
}

type Observers = Arc<Mutex<Vec<Sender<ControllerEvent>>>>;

struct ActiveSession {
    session: Arc<ConnectionSession>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Close the session and wait until its dispatcher has drained.
    fn dispose(mut self) {
        self.session.close();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                log::error!("Dispatcher for {} panicked", self.session.port());
            }
        }
    }
}

pub struct DeviceController {
    factory: Arc<dyn SerialFactory>,
    config: LinkConfig,
    baud_rate: BaudRate,
    scan_config: ScanConfig,
    active: Mutex<Option<ActiveSession>>,
    status: Arc<Mutex<DeviceStatus>>,
    observers: Observers,
}

impl DeviceController {
    /// Fails with `Config` if the configuration is invalid; no I/O happens.
    pub fn new(factory: Arc<dyn SerialFactory>, config: LinkConfig) -> LinkResult<Self> {
        let baud_rate = config.validate()?;
        let scan_config = config.scan_config()?;
        Ok(Self {
            factory,
            config,
            baud_rate,
            scan_config,
            active: Mutex::new(None),
            status: Arc::new(Mutex::new(DeviceStatus::default())),
            observers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.config.write_timeout_ms)
    }

    /// Open `port` with the configured settings and make it the active session.
    ///
    /// Reconnecting to the active port closes the current session first,
    /// since the OS grants one handle per port.
    pub fn connect(&self, port: &str) -> LinkResult<()> {
        if self.active_port().as_deref() == Some(port) {
            self.disconnect();
        }
        let session = ConnectionSession::new(port, self.baud_rate, self.config.session_config());
        session.open(
            self.factory.as_ref(),
            Duration::from_millis(self.config.open_timeout_ms),
        )?;
        self.adopt(session)
    }

    /// Scan `candidates` and adopt the winner. Returns the winning port.
    ///
    /// Any active session is closed first so its port can be probed too.
    pub fn scan(&self, candidates: &[String]) -> LinkResult<Option<String>> {
        self.disconnect();
        let hit = self.scanner().scan(candidates);
        self.adopt_hit(hit)
    }

    /// Scan every listed port that is not excluded by the configuration.
    pub fn scan_available(&self) -> LinkResult<Option<String>> {
        self.disconnect();
        let hit = self.scanner().scan_available()?;
        self.adopt_hit(hit)
    }

    fn scanner(&self) -> PortScanner {
        PortScanner::new(Arc::clone(&self.factory), self.scan_config.clone())
    }

    fn adopt_hit(&self, hit: Option<crate::discovery::ScanHit>) -> LinkResult<Option<String>> {
        match hit {
            Some(hit) => {
                self.adopt(hit.session)?;
                Ok(Some(hit.port))
            }
            None => Ok(None),
        }
    }

    /// Make an open session the active one, disposing any previous session.
    pub fn adopt(&self, session: ConnectionSession) -> LinkResult<()> {
        if !session.is_open() {
            return Err(LinkError::Connection(format!(
                "Cannot adopt {}: session is {:?}",
                session.port(),
                session.state()
            )));
        }
        let events = session.subscribe();
        let session = Arc::new(session);

        let mut active = lock(&self.active);
        if let Some(old) = active.take() {
            log::info!("Replacing session on {}", old.session.port());
            old.dispose();
        }

        let port = session.port().to_string();
        let status = Arc::clone(&self.status);
        let observers = Arc::clone(&self.observers);
        let dispatcher = thread::Builder::new()
            .name(format!("dispatch-{port}"))
            .spawn(move || run_dispatcher(port, events, status, observers))
            .map_err(|e| LinkError::Io(format!("Failed to spawn dispatcher: {e}")))?;

        log::info!("Connected to {}", session.port());
        *active = Some(ActiveSession {
            session,
            dispatcher: Some(dispatcher),
        });
        Ok(())
    }

    /// Close the active session, if any.
    pub fn disconnect(&self) {
        let old = lock(&self.active).take();
        if let Some(old) = old {
            log::info!("Disconnecting from {}", old.session.port());
            old.dispose();
        }
    }

    fn session(&self) -> Option<Arc<ConnectionSession>> {
        lock(&self.active)
            .as_ref()
            .map(|active| Arc::clone(&active.session))
    }

    /// Send a command on the active session.
    pub fn try_send_command(
        &self,
        cmd: CommandType,
        payload: &[u8],
        timeout: Duration,
    ) -> LinkResult<()> {
        let session = self.session().ok_or(LinkError::NotConnected)?;
        session.send_command(cmd, payload, timeout)
    }

    /// Like `try_send_command`, reporting only whether the write succeeded.
    pub fn send_command(&self, cmd: CommandType, payload: &[u8], timeout: Duration) -> bool {
        match self.try_send_command(cmd, payload, timeout) {
            Ok(()) => true,
            Err(LinkError::NotConnected) => {
                log::debug!("{cmd:?} not sent: no device connected");
                false
            }
            Err(e) => {
                log::warn!("{cmd:?} not sent: {e}");
                false
            }
        }
    }

    pub fn ping(&self, challenge: u8) -> bool {
        self.send_command(CommandType::Ping, &[challenge], self.write_timeout())
    }

    /// Ask for a ReturnStatus; the reply lands in `last_status`.
    pub fn request_status(&self) -> bool {
        self.send_command(CommandType::GetStatus, &[], self.write_timeout())
    }

    pub fn set_point(&self, value: f32) -> bool {
        self.send_command(
            CommandType::SetPoint,
            &set_point_payload(value),
            self.write_timeout(),
        )
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.send_command(
            CommandType::EnableDisable,
            &enable_payload(enabled),
            self.write_timeout(),
        )
    }

    /// Status from the most recent valid ReturnStatus (zeros before the first)
    pub fn last_status(&self) -> DeviceStatus {
        *lock(&self.status)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|active| active.session.is_open())
    }

    pub fn active_port(&self) -> Option<String> {
        lock(&self.active)
            .as_ref()
            .filter(|active| active.session.is_open())
            .map(|active| active.session.port().to_string())
    }

    /// Receive controller events from now on. Never blocks the producer.
    pub fn subscribe(&self) -> Receiver<ControllerEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.subscriber_capacity);
        lock(&self.observers).push(tx);
        rx
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn run_dispatcher(
    port: String,
    events: Receiver<SessionEvent>,
    status: Arc<Mutex<DeviceStatus>>,
    observers: Observers,
) {
    for event in events.iter() {
        match event {
            SessionEvent::Frame(frame) => handle_frame(&port, frame, &status, &observers),
            SessionEvent::Closed => break,
        }
    }
    log::info!("Session on {port} closed");
    broadcast(
        &mut lock(&observers),
        ControllerEvent::Disconnected { port: port.clone() },
        &port,
    );
}

fn handle_frame(port: &str, frame: Frame, status: &Mutex<DeviceStatus>, observers: &Observers) {
    let update = match frame.response() {
        Some(ResponseType::ReturnStatus) => match DeviceStatus::from_payload(&frame.payload) {
            Some(reading) => Some(reading),
            None => {
                log::warn!(
                    "{port}: ReturnStatus with {} byte payload ignored",
                    frame.payload.len()
                );
                None
            }
        },
        Some(ResponseType::Nack) => {
            log::warn!("{port}: device rejected a command (NACK)");
            None
        }
        Some(ResponseType::Error) => {
            match frame.error_code() {
                Some(code) => log::warn!("{port}: device error {code:#04x}"),
                None => log::warn!("{port}: device error without code"),
            }
            None
        }
        _ => None,
    };

    let mut observers = lock(observers);
    broadcast(&mut observers, ControllerEvent::Frame(frame), port);
    if let Some(reading) = update {
        *lock(status) = reading;
        log::debug!(
            "{port}: {:.2} V, {:.1} °C",
            reading.voltage,
            reading.temperature
        );
        broadcast(&mut observers, ControllerEvent::Status(reading), port);
    }
}
