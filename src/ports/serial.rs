//! Serial port traits
//!
//! Split into three traits:
//! - `ByteSource` — timed exact reads, what the frame decoder consumes
//! - `SerialConnection` — an open port: reads, writes, cloning, closing
//! - `SerialFactory` — listing and opening ports

use std::time::Duration;

use crate::domain::{BaudRate, LinkResult, SerialPortInfo};

/// Something the frame decoder can pull bytes from.
pub trait ByteSource {
    /// Read exactly `n` bytes, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the timeout expired before `n` bytes arrived. Bytes
    /// that did arrive are not lost: they are the first bytes handed out by
    /// the next call. `Err` is a fatal I/O failure.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> LinkResult<Option<Vec<u8>>>;
}

/// An open serial port connection.
/// Only requires `Send` (not `Sync`): the read handle lives on the decode
/// thread and the write handle is always accessed behind a Mutex.
pub trait SerialConnection: ByteSource + Send {
    /// Write all bytes, waiting at most `timeout`.
    ///
    /// `LinkError::Timeout` leaves the connection usable; any other error
    /// means the port is gone.
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> LinkResult<()>;

    /// Independent handle to the same port, used to read while another
    /// handle writes.
    fn try_clone(&self) -> LinkResult<Box<dyn SerialConnection>>;

    /// Release the handle. Safe to call more than once.
    fn close(&mut self);

    /// Check if the handle is still open
    fn is_connected(&self) -> bool;
}

/// Lists and opens serial ports.
pub trait SerialFactory: Send + Sync {
    /// List available serial ports on the system
    fn list_ports(&self) -> LinkResult<Vec<SerialPortInfo>>;

    /// Open a port at 8N1 with the given baud rate, giving up after `timeout`.
    fn open(
        &self,
        port: &str,
        baud_rate: BaudRate,
        timeout: Duration,
    ) -> LinkResult<Box<dyn SerialConnection>>;
}
