// Bridge Configuration
//
// Everything the bridge needs is passed in as a value at
// construction. Nothing is re-read while the bridge runs.

use serde::{Deserialize, Serialize};

use crate::log::AppendMode;
use crate::serial::framer::DEFAULT_BUFFER_LIMIT;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("malformed configuration: {0}")]
    Malformed(String),
}

/// Top-level configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub log: LogConfig,

    /// Slots in the hand-off queue between the serial and log legs.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyACM0`.
    pub device: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound on how long a pending read ignores shutdown.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Longest line accepted, in bytes.
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,
}

/// How `connect` treats a log that does not exist yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenMode {
    /// Fail with `LogNotFound`.
    #[default]
    AppendExisting,

    /// Create it on the configured log server.
    CreateIfMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Base URL of the log service.
    pub server: String,

    /// Logical name of the destination log.
    pub name: String,

    #[serde(default)]
    pub mode: AppendMode,

    #[serde(default)]
    pub open_mode: OpenMode,

    /// Log server that hosts a newly created log. Left to the
    /// service when unset.
    #[serde(default)]
    pub log_server: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_buffer_limit() -> usize {
    DEFAULT_BUFFER_LIMIT
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl SerialConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }
}

impl LogConfig {
    pub fn new(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
            mode: AppendMode::default(),
            open_mode: OpenMode::default(),
            log_server: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    pub fn new(serial: SerialConfig, log: LogConfig) -> Self {
        Self {
            serial,
            log,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(data).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Reject values the bridge cannot run with.
    ///
    /// The server address is only checked for presence here; the log
    /// service implementation decides which schemes it accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.serial.device.trim().is_empty(), "serial.device is empty"),
            (self.serial.baud_rate == 0, "serial.baud_rate must be positive"),
            (
                self.serial.read_timeout_ms == 0,
                "serial.read_timeout_ms must be positive",
            ),
            (
                self.serial.buffer_limit == 0,
                "serial.buffer_limit must be positive",
            ),
            (self.log.server.trim().is_empty(), "log.server is empty"),
            (self.log.name.trim().is_empty(), "log.name is empty"),
            (
                self.log.request_timeout_ms == 0,
                "log.request_timeout_ms must be positive",
            ),
            (self.queue_capacity == 0, "queue_capacity must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ConfigError::Invalid((*reason).into())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_json_applies_defaults() {
        let json = r#"
        {
          "serial": { "device": "/dev/tty.usbmodem1411131" },
          "log": {
            "server": "http://gdp-01.eecs.berkeley.edu:8080",
            "name": "edu.berkeley.eecs.bid.mellis.arduino101"
          }
        }
        "#;

        let config = BridgeConfig::from_json(json).unwrap();
        assert_eq!(config.serial.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.serial.buffer_limit, DEFAULT_BUFFER_LIMIT);
        assert_eq!(config.log.mode, AppendMode::BlindAppend);
        assert_eq!(config.log.open_mode, OpenMode::AppendExisting);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_modes() {
        let json = r#"
        {
          "serial": { "device": "/dev/ttyACM0", "baud_rate": 115200 },
          "log": {
            "server": "http://localhost:8080",
            "name": "sensors",
            "mode": "strict-append",
            "open_mode": "create-if-missing",
            "log_server": "edge-01"
          },
          "queue_capacity": 1
        }
        "#;

        let config = BridgeConfig::from_json(json).unwrap();
        assert_eq!(config.log.mode, AppendMode::StrictAppend);
        assert_eq!(config.log.open_mode, OpenMode::CreateIfMissing);
        assert_eq!(config.log.log_server.as_deref(), Some("edge-01"));
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = BridgeConfig::from_json("{ \"serial\": {} }").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = BridgeConfig::new(
            SerialConfig::new("/dev/ttyACM0"),
            LogConfig::new("http://localhost:8080", "sensors"),
        );
        config.queue_capacity = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn empty_log_name_is_rejected() {
        let config = BridgeConfig::new(
            SerialConfig::new("/dev/ttyACM0"),
            LogConfig::new("http://localhost:8080", " "),
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid("log.name is empty".into()))
        );
    }
}
