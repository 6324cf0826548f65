//! Port discovery: find the one port the device is attached to.
//!
//! Every candidate port gets its own probe thread. A probe opens a trial
//! session, sends a Ping carrying one random challenge byte and waits for a
//! PingAck echoing that byte. The first probe to verify wins; the others see
//! the shared cancel flag, drop their trial sessions and exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::domain::{LinkResult, ScanConfig};
use crate::frame::{CommandType, ConnectionSession, Frame, ResponseType, SessionEvent};
use crate::ports::SerialFactory;

/// How often a waiting probe checks whether another probe already won
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// The verified port and its already-open session
#[derive(Debug)]
pub struct ScanHit {
    pub port: String,
    pub session: ConnectionSession,
}

/// Drop port names containing any excluded pattern (case-insensitive).
pub fn filter_candidates<I, S>(ports: I, excluded: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let excluded: Vec<String> = excluded.iter().map(|p| p.to_lowercase()).collect();
    ports
        .into_iter()
        .map(Into::into)
        .filter(|name| {
            let lower = name.to_lowercase();
            let skip = excluded.iter().any(|pattern| lower.contains(pattern.as_str()));
            if skip {
                log::debug!("Skipping excluded port {name}");
            }
            !skip
        })
        .collect()
}

/// Races ping probes across candidate ports
pub struct PortScanner {
    factory: Arc<dyn SerialFactory>,
    config: ScanConfig,
}

impl PortScanner {
    pub fn new(factory: Arc<dyn SerialFactory>, config: ScanConfig) -> Self {
        Self { factory, config }
    }

    /// List the system's ports, drop excluded ones, and scan the rest.
    pub fn scan_available(&self) -> LinkResult<Option<ScanHit>> {
        let ports = self.factory.list_ports()?;
        let candidates = filter_candidates(
            ports.into_iter().map(|p| p.name),
            &self.config.excluded_patterns,
        );
        Ok(self.scan(&candidates))
    }

    /// Probe all candidates concurrently and return the first verified one.
    ///
    /// `None` means no candidate answered, which is a normal outcome. Every
    /// losing trial session has been closed by the time this returns.
    pub fn scan(&self, candidates: &[String]) -> Option<ScanHit> {
        if candidates.is_empty() {
            log::info!("No candidate ports to scan");
            return None;
        }
        log::info!("Scanning {} candidate port(s)", candidates.len());

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut probes = Vec::with_capacity(candidates.len());

        for port in candidates {
            let probe = Probe {
                port: port.clone(),
                factory: Arc::clone(&self.factory),
                config: self.config.clone(),
                cancel: Arc::clone(&cancel),
            };
            let tx = tx.clone();
            match thread::Builder::new()
                .name(format!("probe-{port}"))
                .spawn(move || probe.run(tx))
            {
                Ok(handle) => probes.push(handle),
                Err(e) => log::warn!("Could not start probe for {port}: {e}"),
            }
        }
        drop(tx);

        // Disconnects once every probe has given up without a hit.
        let winner = rx.recv().ok();
        cancel.store(true, Ordering::SeqCst);

        for handle in probes {
            if handle.join().is_err() {
                log::error!("Probe thread panicked");
            }
        }
        for late in rx.try_iter() {
            log::debug!("Discarding late responder on {}", late.port);
        }

        match &winner {
            Some(hit) => log::info!("Device found on {}", hit.port),
            None => log::info!("No device answered on {} port(s)", candidates.len()),
        }
        winner
    }
}

/// One candidate's probe, run on its own thread
struct Probe {
    port: String,
    factory: Arc<dyn SerialFactory>,
    config: ScanConfig,
    cancel: Arc<AtomicBool>,
}

impl Probe {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn run(self, results: Sender<ScanHit>) {
        if let Some(session) = self.verify() {
            let _ = results.send(ScanHit {
                port: self.port,
                session,
            });
        }
    }

    fn verify(&self) -> Option<ConnectionSession> {
        if self.cancelled() {
            return None;
        }
        let session =
            ConnectionSession::new(&self.port, self.config.baud_rate, self.config.session.clone());
        if let Err(e) = session.open(self.factory.as_ref(), self.config.open_timeout) {
            log::debug!("{}: not a candidate: {e}", self.port);
            return None;
        }
        if self.cancelled() {
            return None;
        }

        let events = session.subscribe();
        let challenge: u8 = rand::random();
        if let Err(e) =
            session.send_command(CommandType::Ping, &[challenge], self.config.write_timeout)
        {
            log::debug!("{}: ping not sent: {e}", self.port);
            return None;
        }

        let deadline = Instant::now() + self.config.probe_window;
        loop {
            if self.cancelled() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("{}: no ping echo within {:?}", self.port, self.config.probe_window);
                return None;
            }
            match events.recv_timeout(remaining.min(CANCEL_POLL)) {
                Ok(SessionEvent::Frame(frame)) if is_echo(&frame, challenge) => {
                    log::debug!("{}: ping echo verified", self.port);
                    return Some(session);
                }
                Ok(SessionEvent::Frame(frame)) => {
                    log::debug!(
                        "{}: ignoring frame type {:#04x} while probing",
                        self.port,
                        frame.frame_type
                    );
                }
                Ok(SessionEvent::Closed) | Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

fn is_echo(frame: &Frame, challenge: u8) -> bool {
    frame.response() == Some(ResponseType::PingAck) && frame.payload.first() == Some(&challenge)
}
