//! ConnectionSession: owns one serial connection and runs its decode loop.
//!
//! After `open`, a dedicated thread reads frames off a cloned read handle
//! and publishes them to subscribers in arrival order. Writes go through the
//! original handle behind a mutex, so they never wait on the reader and two
//! writers never interleave on the wire.
//!
//! Sessions are single use: once Closed, build a new one to reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::domain::{BaudRate, LinkError, LinkResult, SessionConfig};
use crate::ports::{SerialConnection, SerialFactory};
use crate::sync::{broadcast, lock};

use super::{decode_with, encode, CommandType, DecodeOutcome, Frame, MAX_PAYLOAD};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, `open` not called yet
    Idle,
    Opening,
    /// Decode loop running
    Open,
    Closed,
}

/// What subscribers receive
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Frame(Frame),
    /// No further frames will arrive
    Closed,
}

/// State shared between the session handle and its decode thread
struct Shared {
    port: String,
    state: Mutex<SessionState>,
    writer: Mutex<Option<Box<dyn SerialConnection>>>,
    subscribers: Mutex<Vec<crossbeam_channel::Sender<SessionEvent>>>,
    shutdown: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    /// Stop accepting writes and ask the decode thread to exit.
    fn begin_close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut writer) = lock(&self.writer).take() {
            writer.close();
        }
        self.set_state(SessionState::Closed);
    }

    /// Final step: tell subscribers and drop their senders.
    fn finish(&self) {
        self.begin_close();
        let mut subscribers = std::mem::take(&mut *lock(&self.subscribers));
        broadcast(&mut subscribers, SessionEvent::Closed, &self.port);
    }
}

/// One connection to one port
pub struct ConnectionSession {
    port: String,
    baud_rate: BaudRate,
    config: SessionConfig,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    pub fn new(port: &str, baud_rate: BaudRate, config: SessionConfig) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            config,
            shared: Arc::new(Shared {
                port: port.to_string(),
                state: Mutex::new(SessionState::Idle),
                writer: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
            }),
            reader: Mutex::new(None),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.shared.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Open the port and start the decode loop.
    ///
    /// Fails with `Connection` or `Timeout` if the port cannot be opened in
    /// time; the session is Closed afterwards either way.
    pub fn open(&self, factory: &dyn SerialFactory, timeout: Duration) -> LinkResult<()> {
        {
            let mut state = lock(&self.shared.state);
            if *state != SessionState::Idle {
                return Err(LinkError::Connection(format!(
                    "Session for {} cannot be reopened (state {:?})",
                    self.port, *state
                )));
            }
            *state = SessionState::Opening;
        }

        match self.start(factory, timeout) {
            Ok(()) => {
                log::info!("Opened {} at {} baud", self.port, self.baud_rate);
                Ok(())
            }
            Err(e) => {
                log::debug!("Open of {} failed: {e}", self.port);
                self.shared.finish();
                Err(e)
            }
        }
    }

    fn start(&self, factory: &dyn SerialFactory, timeout: Duration) -> LinkResult<()> {
        let writer = factory.open(&self.port, self.baud_rate, timeout)?;
        let reader = writer.try_clone()?;

        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        *lock(&self.shared.writer) = Some(writer);
        self.shared.set_state(SessionState::Open);

        let shared = Arc::clone(&self.shared);
        let read_timeout = self.config.read_timeout;
        // Once a header is in, allow a full payload to arrive at line speed.
        let frame_timeout = read_timeout.max(self.baud_rate.transfer_time(MAX_PAYLOAD));
        let handle = thread::Builder::new()
            .name(format!("decode-{}", self.port))
            .spawn(move || run_decode_loop(shared, reader, read_timeout, frame_timeout))
            .map_err(|e| LinkError::Io(format!("Failed to spawn decode thread: {e}")))?;
        *lock(&self.reader) = Some(handle);
        Ok(())
    }

    /// Receive every frame decoded from now on.
    ///
    /// The queue is bounded; a subscriber that falls behind loses frames
    /// rather than stalling the decode loop. The channel disconnects once
    /// the session is closed.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.subscriber_capacity);
        let mut subscribers = lock(&self.shared.subscribers);
        if self.state() == SessionState::Closed {
            let _ = tx.try_send(SessionEvent::Closed);
        } else {
            subscribers.push(tx);
        }
        rx
    }

    /// Encode and write one frame.
    ///
    /// A non-fatal failure such as `Timeout` leaves the session open; a
    /// fatal one closes it.
    pub fn send_frame(&self, frame_type: u8, payload: &[u8], timeout: Duration) -> LinkResult<()> {
        let wire = encode(frame_type, payload)?;
        let result = {
            let mut writer = lock(&self.shared.writer);
            let conn = writer.as_mut().ok_or(LinkError::Closed)?;
            conn.write_all(&wire, timeout)
        };

        match result {
            Ok(()) => {
                log::debug!("TX {}: {:02X?}", self.port, wire);
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                log::warn!("TX {} failed, session stays open: {e}", self.port);
                Err(e)
            }
            Err(e) => {
                log::error!("TX {} failed, closing session: {e}", self.port);
                self.shared.begin_close();
                Err(e)
            }
        }
    }

    pub fn send_command(
        &self,
        cmd: CommandType,
        payload: &[u8],
        timeout: Duration,
    ) -> LinkResult<()> {
        self.send_frame(cmd.code(), payload, timeout)
    }

    /// Close the port and stop the decode loop. Safe to call repeatedly.
    ///
    /// Waits for the decode thread, which exits within one read timeout.
    pub fn close(&self) {
        self.shared.begin_close();
        let handle = lock(&self.reader).take();
        match handle {
            Some(handle) if handle.thread().id() != thread::current().id() => {
                if handle.join().is_err() {
                    log::error!("Decode thread for {} panicked", self.port);
                }
            }
            Some(_) => {}
            None => self.shared.finish(),
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state())
            .finish()
    }
}

fn run_decode_loop(
    shared: Arc<Shared>,
    mut reader: Box<dyn SerialConnection>,
    read_timeout: Duration,
    frame_timeout: Duration,
) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match decode_with(reader.as_mut(), read_timeout, frame_timeout) {
            Ok(DecodeOutcome::Frame(frame)) => {
                log::debug!(
                    "RX {}: type={:#04x} len={}",
                    shared.port,
                    frame.frame_type,
                    frame.payload.len()
                );
                broadcast(
                    &mut lock(&shared.subscribers),
                    SessionEvent::Frame(frame),
                    &shared.port,
                );
            }
            Ok(DecodeOutcome::NoData) => {}
            Ok(DecodeOutcome::Malformed(e)) => {
                log::debug!("RX {}: dropped malformed frame: {e}", shared.port);
            }
            Err(e) => {
                if !shared.shutdown.load(Ordering::SeqCst) {
                    log::error!("RX {} failed, closing session: {e}", shared.port);
                }
                break;
            }
        }
    }
    reader.close();
    shared.finish();
}
