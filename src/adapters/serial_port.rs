//! Serial port adapter using the `serialport` crate
//!
//! Implements `SerialFactory` and `SerialConnection`. Line settings are
//! fixed at 8N1 with no flow control; only the baud rate varies.

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::domain::{BaudRate, LinkError, LinkResult, SerialPortInfo};
use crate::ports::{ByteSource, SerialConnection, SerialFactory};

/// Initial port timeout; every read and write sets its own before use.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Short human-readable description of how a port is attached.
fn port_type_label(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => format!("USB ({:04X}:{:04X})", info.vid, info.pid),
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "Native".to_string(),
    }
}

/// Zero-sized factory for real serial ports.
pub struct SerialPortFactory;

impl SerialFactory for SerialPortFactory {
    fn list_ports(&self) -> LinkResult<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| LinkError::Io(format!("Failed to list ports: {e}")))?;

        Ok(ports
            .into_iter()
            .map(|p| SerialPortInfo {
                port_type: port_type_label(&p.port_type),
                name: p.port_name,
            })
            .collect())
    }

    /// The OS open can hang on some drivers, so it runs on a helper thread.
    /// If it has not finished by `timeout` the caller gets `Timeout` and the
    /// helper drops whatever handle it eventually gets.
    fn open(
        &self,
        port: &str,
        baud_rate: BaudRate,
        timeout: Duration,
    ) -> LinkResult<Box<dyn SerialConnection>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let name = port.to_string();
        thread::Builder::new()
            .name(format!("open-{port}"))
            .spawn(move || {
                let result = serialport::new(&name, baud_rate.as_u32())
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(FlowControl::None)
                    .timeout(DEFAULT_IO_TIMEOUT)
                    .open();
                if let Err(crossbeam_channel::SendError(Ok(_late))) = tx.send(result) {
                    log::debug!("Releasing {name}: open finished after the caller gave up");
                }
            })
            .map_err(|e| LinkError::Io(format!("Failed to spawn open thread for {port}: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(handle)) => Ok(Box::new(SerialPortConnection::new(port, handle))),
            Ok(Err(e)) => Err(LinkError::Connection(format!("Failed to open {port}: {e}"))),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout(format!(
                "Opening {port} took longer than {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Connection(format!(
                "Open thread for {port} exited without a result"
            ))),
        }
    }
}

/// An open serial port connection wrapping the `serialport` crate.
pub struct SerialPortConnection {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    /// Bytes that arrived during a read that then timed out
    pending: Vec<u8>,
}

impl SerialPortConnection {
    fn new(name: &str, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.to_string(),
            port: Some(port),
            pending: Vec::new(),
        }
    }

    fn handle(&mut self) -> LinkResult<&mut Box<dyn SerialPort>> {
        let name = &self.name;
        self.port
            .as_mut()
            .ok_or_else(|| LinkError::Io(format!("{name}: port closed")))
    }

    /// Drop the handle after an unrecoverable error.
    fn fail(&mut self, what: &str, e: std::io::Error) -> LinkError {
        self.port = None;
        self.pending.clear();
        LinkError::Io(format!("{}: {what} failed: {e}", self.name))
    }

    /// Keep a short read for the next call and report the timeout.
    fn stash(&mut self, mut partial: Vec<u8>, filled: usize) -> LinkResult<Option<Vec<u8>>> {
        partial.truncate(filled);
        self.pending = partial;
        Ok(None)
    }
}

impl ByteSource for SerialPortConnection {
    fn read_exact(&mut self, n: usize, timeout: Duration) -> LinkResult<Option<Vec<u8>>> {
        if self.pending.len() >= n {
            return Ok(Some(self.pending.drain(..n).collect()));
        }

        let deadline = Instant::now() + timeout;
        let mut buf = std::mem::take(&mut self.pending);
        let mut filled = buf.len();
        buf.resize(n, 0);

        while filled < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.stash(buf, filled);
            }
            let port = self.handle()?;
            port.set_timeout(remaining)
                .map_err(|e| LinkError::Io(format!("Failed to set read timeout: {e}")))?;
            match port.read(&mut buf[filled..]) {
                Ok(read) => filled += read,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return self.stash(buf, filled);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fail("read", e)),
            }
        }
        Ok(Some(buf))
    }
}

impl SerialConnection for SerialPortConnection {
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> LinkResult<()> {
        let port = self.handle()?;
        port.set_timeout(timeout)
            .map_err(|e| LinkError::Io(format!("Failed to set write timeout: {e}")))?;
        match port.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(LinkError::Timeout(format!(
                "{}: write of {} bytes timed out",
                self.name,
                data.len()
            ))),
            Err(e) => Err(self.fail("write", e)),
        }
    }

    fn try_clone(&self) -> LinkResult<Box<dyn SerialConnection>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| LinkError::Io(format!("{}: port closed", self.name)))?;
        let clone = port
            .try_clone()
            .map_err(|e| LinkError::Io(format!("Failed to clone {}: {e}", self.name)))?;
        Ok(Box::new(SerialPortConnection::new(&self.name, clone)))
    }

    fn close(&mut self) {
        self.pending.clear();
        if self.port.take().is_some() {
            log::debug!("Closed handle on {}", self.name);
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}
