// Serial Line Input
//
// Owns the serial device, frames raw bytes into newline-terminated
// records and hands them out one at a time.

pub mod framer;
pub mod reader;
pub mod source;

pub use framer::LineFramer;
pub use reader::SerialLineReader;
pub use source::{ByteSource, ReaderSource, SerialPortSource};

/// Delimiter that terminates a record.
pub const LINE_DELIMITER: u8 = b'\n';

/// Errors raised by the serial leg.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SerialError {
    /// The device path does not exist or is held by another process.
    #[error("device `{path}` unavailable: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    /// The device refused the requested line settings.
    #[error("device `{path}` rejected configuration: {reason}")]
    DeviceConfigError { path: String, reason: String },

    /// The device went away mid-stream. Terminal.
    #[error("device disconnected: {reason}")]
    DeviceDisconnected { reason: String },
}
