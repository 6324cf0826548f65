//! Simulated device for development and testing without hardware.
//!
//! Activate in the binary by setting MOCK_DEVICE=1 in the environment:
//!
//!   MOCK_DEVICE=1 RUST_LOG=devlink_lib=debug cargo run
//!
//! Each simulated port parses the frames the host writes and answers them
//! according to its `MockDevice` behavior. The factory keeps per-port
//! bookkeeping (live handle count, everything written) so tests can check
//! that sessions release their handles and never interleave frames.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::{BaudRate, DeviceStatus, LinkError, LinkResult, SerialPortInfo};
use crate::frame::{decode_bytes, encode, CommandType, DecodeOutcome, Frame, ResponseType};
use crate::ports::{ByteSource, SerialConnection, SerialFactory};
use crate::sync::lock;

/// Error code the simulated device reports for commands it does not know
pub const UNKNOWN_COMMAND_ERROR: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reply {
    /// Answer every command like real firmware
    Normal,
    /// Answer pings with a corrupted echo
    WrongEcho,
    /// Never answer
    Silent,
}

/// How a simulated port behaves
#[derive(Debug, Clone)]
pub struct MockDevice {
    reply: Reply,
    openable: bool,
    open_delay: Duration,
    latency: Duration,
    status: DeviceStatus,
}

impl MockDevice {
    /// The device: echoes pings, reports status, ACKs settings.
    pub fn responsive() -> Self {
        Self {
            reply: Reply::Normal,
            openable: true,
            open_delay: Duration::ZERO,
            latency: Duration::ZERO,
            status: DeviceStatus {
                voltage: 3.3,
                temperature: 25.0,
            },
        }
    }

    /// Some other device that answers pings with the wrong byte.
    pub fn wrong_echo() -> Self {
        Self {
            reply: Reply::WrongEcho,
            ..Self::responsive()
        }
    }

    /// A port with nothing listening on it.
    pub fn silent() -> Self {
        Self {
            reply: Reply::Silent,
            ..Self::responsive()
        }
    }

    /// A port the OS refuses to open (busy, no permission).
    pub fn unopenable() -> Self {
        Self {
            openable: false,
            ..Self::silent()
        }
    }

    /// Delay before `open` completes
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Delay between receiving a command and answering it
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    fn respond(&self, frame: &Frame) -> Option<Frame> {
        if self.reply == Reply::Silent {
            return None;
        }
        let reply = match frame.command() {
            Some(CommandType::Ping) => {
                let echo = match self.reply {
                    Reply::WrongEcho => frame.payload.iter().map(|b| b.wrapping_add(1)).collect(),
                    _ => frame.payload.clone(),
                };
                Frame::new(ResponseType::PingAck.code(), echo)
            }
            Some(CommandType::GetStatus) => Frame::new(
                ResponseType::ReturnStatus.code(),
                self.status.to_payload().to_vec(),
            ),
            Some(CommandType::SetPoint) if frame.payload.len() == 4 => {
                Frame::new(ResponseType::Ack.code(), Vec::new())
            }
            Some(CommandType::EnableDisable) if frame.payload.len() == 1 => {
                Frame::new(ResponseType::Ack.code(), Vec::new())
            }
            Some(_) => Frame::new(ResponseType::Nack.code(), Vec::new()),
            None => Frame::new(ResponseType::Error.code(), vec![UNKNOWN_COMMAND_ERROR]),
        };
        Some(reply)
    }
}

/// Shared state of one simulated port
struct PortSim {
    name: String,
    device: MockDevice,
    /// device → host bytes
    inbound: Mutex<VecDeque<u8>>,
    arrived: Condvar,
    /// host → device bytes, in the order they hit the wire
    wire: Mutex<Vec<u8>>,
    handles: AtomicUsize,
    opens: AtomicUsize,
    unplugged: AtomicBool,
    stalled: AtomicBool,
}

impl PortSim {
    fn push_inbound(&self, bytes: &[u8]) {
        lock(&self.inbound).extend(bytes);
        self.arrived.notify_all();
    }

    fn deliver(self: &Arc<Self>, frame: Frame) {
        let wire = match encode(frame.frame_type, &frame.payload) {
            Ok(wire) => wire,
            Err(e) => {
                log::error!("[MOCK {}] cannot encode reply: {e}", self.name);
                return;
            }
        };
        let latency = self.device.latency;
        if latency.is_zero() {
            self.push_inbound(&wire);
            return;
        }
        let sim = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(latency);
            sim.push_inbound(&wire);
        });
    }
}

/// Factory for simulated ports
#[derive(Default)]
pub struct MockDeviceFactory {
    ports: Mutex<BTreeMap<String, Arc<PortSim>>>,
}

impl MockDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated port
    pub fn add_port(&self, name: &str, device: MockDevice) {
        log::info!("[MOCK {name}] registered ({:?})", device.reply);
        let sim = Arc::new(PortSim {
            name: name.to_string(),
            device,
            inbound: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
            wire: Mutex::new(Vec::new()),
            handles: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            unplugged: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        });
        lock(&self.ports).insert(name.to_string(), sim);
    }

    fn sim(&self, name: &str) -> Option<Arc<PortSim>> {
        lock(&self.ports).get(name).cloned()
    }

    /// Handles currently open on `port` (clones included)
    pub fn open_handles(&self, port: &str) -> usize {
        self.sim(port)
            .map_or(0, |sim| sim.handles.load(Ordering::SeqCst))
    }

    /// Number of successful opens of `port`
    pub fn open_count(&self, port: &str) -> usize {
        self.sim(port).map_or(0, |sim| sim.opens.load(Ordering::SeqCst))
    }

    /// Everything the host has written to `port`
    pub fn wire_log(&self, port: &str) -> Vec<u8> {
        self.sim(port)
            .map(|sim| lock(&sim.wire).clone())
            .unwrap_or_default()
    }

    /// Push raw device → host bytes onto `port`
    pub fn inject(&self, port: &str, bytes: &[u8]) {
        if let Some(sim) = self.sim(port) {
            sim.push_inbound(bytes);
        }
    }

    /// Simulate the cable being pulled: every I/O call fails from now on.
    pub fn unplug(&self, port: &str) {
        if let Some(sim) = self.sim(port) {
            sim.unplugged.store(true, Ordering::SeqCst);
            sim.arrived.notify_all();
        }
    }

    /// Make writes on `port` block until their timeout
    pub fn stall_writes(&self, port: &str, stalled: bool) {
        if let Some(sim) = self.sim(port) {
            sim.stalled.store(stalled, Ordering::SeqCst);
        }
    }
}

impl SerialFactory for MockDeviceFactory {
    fn list_ports(&self) -> LinkResult<Vec<SerialPortInfo>> {
        Ok(lock(&self.ports)
            .keys()
            .map(|name| SerialPortInfo {
                name: name.clone(),
                port_type: "Simulated".to_string(),
            })
            .collect())
    }

    fn open(
        &self,
        port: &str,
        baud_rate: BaudRate,
        timeout: Duration,
    ) -> LinkResult<Box<dyn SerialConnection>> {
        let sim = self
            .sim(port)
            .ok_or_else(|| LinkError::Connection(format!("Failed to open {port}: no such port")))?;

        if !sim.device.openable {
            return Err(LinkError::Connection(format!(
                "Failed to open {port}: access denied"
            )));
        }
        if sim.device.open_delay > timeout {
            thread::sleep(timeout);
            return Err(LinkError::Timeout(format!(
                "Opening {port} took longer than {timeout:?}"
            )));
        }
        thread::sleep(sim.device.open_delay);

        lock(&sim.inbound).clear();
        sim.opens.fetch_add(1, Ordering::SeqCst);
        log::debug!("[MOCK {port}] opened at {baud_rate} baud");
        Ok(Box::new(MockPort::attach(sim)))
    }
}

/// One handle on a simulated port
pub struct MockPort {
    sim: Arc<PortSim>,
    open: bool,
}

impl MockPort {
    fn attach(sim: Arc<PortSim>) -> Self {
        sim.handles.fetch_add(1, Ordering::SeqCst);
        Self { sim, open: true }
    }

    fn check_usable(&self) -> LinkResult<()> {
        if !self.open {
            return Err(LinkError::Io(format!("{}: handle closed", self.sim.name)));
        }
        if self.sim.unplugged.load(Ordering::SeqCst) {
            return Err(LinkError::Io(format!("{}: device disconnected", self.sim.name)));
        }
        Ok(())
    }
}

impl ByteSource for MockPort {
    fn read_exact(&mut self, n: usize, timeout: Duration) -> LinkResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut inbound = lock(&self.sim.inbound);
        loop {
            self.check_usable()?;
            if inbound.len() >= n {
                return Ok(Some(inbound.drain(..n).collect()));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            inbound = self
                .sim
                .arrived
                .wait_timeout(inbound, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

impl SerialConnection for MockPort {
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> LinkResult<()> {
        self.check_usable()?;
        if self.sim.stalled.load(Ordering::SeqCst) {
            thread::sleep(timeout);
            return Err(LinkError::Timeout(format!(
                "{}: write timed out after {timeout:?}",
                self.sim.name
            )));
        }

        // Byte at a time, so unsynchronized writers would visibly interleave.
        for byte in data {
            lock(&self.sim.wire).push(*byte);
            thread::yield_now();
        }

        for outcome in decode_bytes(data) {
            if let DecodeOutcome::Frame(frame) = outcome {
                if let Some(reply) = self.sim.device.respond(&frame) {
                    self.sim.deliver(reply);
                }
            }
        }
        Ok(())
    }

    fn try_clone(&self) -> LinkResult<Box<dyn SerialConnection>> {
        self.check_usable()?;
        Ok(Box::new(MockPort::attach(Arc::clone(&self.sim))))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.sim.handles.fetch_sub(1, Ordering::SeqCst);
            self.sim.arrived.notify_all();
        }
    }

    fn is_connected(&self) -> bool {
        self.open && !self.sim.unplugged.load(Ordering::SeqCst)
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(50);

    fn open(factory: &MockDeviceFactory, port: &str) -> Box<dyn SerialConnection> {
        factory
            .open(port, BaudRate::B115200, Duration::from_millis(100))
            .unwrap()
    }

    #[test]
    fn responsive_device_echoes_ping() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::responsive());
        let mut port = open(&factory, "A");

        port.write_all(&encode(0x04, &[0x5A]).unwrap(), T).unwrap();
        let reply = port.read_exact(8, T).unwrap().unwrap();
        assert_eq!(reply, encode(0x83, &[0x5A]).unwrap());
    }

    #[test]
    fn wrong_echo_device_corrupts_ping() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::wrong_echo());
        let mut port = open(&factory, "A");

        port.write_all(&encode(0x04, &[0x10]).unwrap(), T).unwrap();
        let reply = port.read_exact(8, T).unwrap().unwrap();
        assert_eq!(reply, encode(0x83, &[0x11]).unwrap());
    }

    #[test]
    fn silent_device_times_out_with_no_data() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::silent());
        let mut port = open(&factory, "A");

        port.write_all(&encode(0x04, &[0x10]).unwrap(), T).unwrap();
        assert_eq!(port.read_exact(2, T).unwrap(), None);
    }

    #[test]
    fn unknown_command_gets_error_frame() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::responsive());
        let mut port = open(&factory, "A");

        port.write_all(&encode(0x42, &[]).unwrap(), T).unwrap();
        let reply = port.read_exact(8, T).unwrap().unwrap();
        assert_eq!(reply, encode(0xFF, &[UNKNOWN_COMMAND_ERROR]).unwrap());
    }

    #[test]
    fn handles_are_counted_across_clones() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::responsive());
        let port = open(&factory, "A");
        let mut clone = port.try_clone().unwrap();
        assert_eq!(factory.open_handles("A"), 2);

        clone.close();
        clone.close();
        assert_eq!(factory.open_handles("A"), 1);
        drop(port);
        assert_eq!(factory.open_handles("A"), 0);
    }

    #[test]
    fn slow_open_times_out() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::responsive().with_open_delay(Duration::from_secs(5)));
        let result = factory.open("A", BaudRate::B9600, Duration::from_millis(20));
        assert!(matches!(result, Err(LinkError::Timeout(_))));
        assert_eq!(factory.open_handles("A"), 0);
    }

    #[test]
    fn unopenable_and_unknown_ports_fail() {
        let factory = MockDeviceFactory::new();
        factory.add_port("busy", MockDevice::unopenable());
        assert!(matches!(
            factory.open("busy", BaudRate::B9600, T),
            Err(LinkError::Connection(_))
        ));
        assert!(matches!(
            factory.open("missing", BaudRate::B9600, T),
            Err(LinkError::Connection(_))
        ));
    }

    #[test]
    fn unplug_fails_reads_and_writes() {
        let factory = MockDeviceFactory::new();
        factory.add_port("A", MockDevice::responsive());
        let mut port = open(&factory, "A");
        factory.unplug("A");
        assert!(matches!(port.read_exact(1, T), Err(LinkError::Io(_))));
        assert!(matches!(port.write_all(&[0], T), Err(LinkError::Io(_))));
        assert!(!port.is_connected());
    }
}
