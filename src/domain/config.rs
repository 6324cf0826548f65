//! Link configuration
//!
//! Everything the host application can tune about the serial link: which
//! port (if known), line speed, timeouts, and which ports discovery should
//! skip. Persisted as JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BaudRate, LinkError, LinkResult};

/// Host-facing link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Fixed port name. When `None`, the port is found by scanning.
    pub port: Option<String>,
    /// Serial baud rate (9600, 19200, 38400, 57600 or 115200)
    pub baud_rate: u32,
    /// Open timeout for a manual connect
    pub open_timeout_ms: u64,
    /// Open timeout for each discovery probe
    pub probe_open_timeout_ms: u64,
    /// How long a probe waits for the ping echo
    pub probe_window_ms: u64,
    /// Per-iteration read timeout of the decode loop
    pub read_timeout_ms: u64,
    /// Timeout for a single frame write
    pub write_timeout_ms: u64,
    /// Queue depth per frame subscriber
    pub subscriber_capacity: usize,
    /// Port names containing any of these (case-insensitive) are never probed
    pub excluded_port_patterns: Vec<String>,
    /// GetStatus polling interval; `None` disables polling
    pub status_poll_interval_ms: Option<u64>,
    /// Let the poller rescan for the device while disconnected
    pub rescan_when_disconnected: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
            open_timeout_ms: 1000,
            probe_open_timeout_ms: 100,
            probe_window_ms: 300,
            read_timeout_ms: 50,
            write_timeout_ms: 200,
            subscriber_capacity: 64,
            excluded_port_patterns: vec!["Bluetooth".to_string(), "BLTH".to_string()],
            status_poll_interval_ms: Some(1000),
            rescan_when_disconnected: false,
        }
    }
}

impl LinkConfig {
    /// Check the settings and return the parsed baud rate.
    pub fn validate(&self) -> LinkResult<BaudRate> {
        let baud = BaudRate::try_from(self.baud_rate)?;
        if self.read_timeout_ms == 0 {
            return Err(LinkError::Config("read_timeout_ms must be non-zero".into()));
        }
        if self.subscriber_capacity == 0 {
            return Err(LinkError::Config(
                "subscriber_capacity must be non-zero".into(),
            ));
        }
        if let Some(port) = &self.port {
            if port.trim().is_empty() {
                return Err(LinkError::Config("port name cannot be empty".into()));
            }
        }
        Ok(baud)
    }

    pub fn load(path: &Path) -> LinkResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LinkError::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            LinkError::Config(format!("Failed to parse config '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> LinkResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LinkError::Config(format!("Serialization error: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            LinkError::Config(format!("Failed to write config '{}': {e}", path.display()))
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            subscriber_capacity: self.subscriber_capacity,
        }
    }

    pub fn scan_config(&self) -> LinkResult<ScanConfig> {
        Ok(ScanConfig {
            baud_rate: self.validate()?,
            open_timeout: Duration::from_millis(self.probe_open_timeout_ms),
            probe_window: Duration::from_millis(self.probe_window_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            excluded_patterns: self.excluded_port_patterns.clone(),
            session: self.session_config(),
        })
    }
}

/// Settings for a single connection session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub read_timeout: Duration,
    pub subscriber_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        LinkConfig::default().session_config()
    }
}

/// Settings for one discovery scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub baud_rate: BaudRate,
    pub open_timeout: Duration,
    pub probe_window: Duration,
    pub write_timeout: Duration,
    pub excluded_patterns: Vec<String>,
    pub session: SessionConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let config = LinkConfig::default();
        Self {
            baud_rate: BaudRate::B115200,
            open_timeout: Duration::from_millis(config.probe_open_timeout_ms),
            probe_window: Duration::from_millis(config.probe_window_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            excluded_patterns: config.excluded_port_patterns.clone(),
            session: config.session_config(),
        }
    }
}
