// Byte Sources
//
// Raw input for the line reader. The serial port is the production
// source; any `Read` can stand in for it (files, stdin, fixtures).

use std::io::{self, Read};
use std::time::Duration;

use serialport::{FlowControl, SerialPort};
use tracing::{debug, info};

use super::SerialError;
use crate::config::SerialConfig;

/// Blocking byte input.
///
/// Return conventions for `read_bytes`:
/// - `Ok(n)` with `n > 0`: `n` bytes were written to `buf`
/// - `Ok(0)`: the stream ended cleanly
/// - `Err(TimedOut | WouldBlock)`: nothing arrived yet, try again
/// - `Err(Interrupted | InvalidData)`: transient, retried by the reader
/// - any other error: the device is gone
pub trait ByteSource: Send {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the underlying handle. Must be idempotent.
    fn release(&mut self);
}

/// Exclusive handle on a serial device.
pub struct SerialPortSource {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialPortSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortSource")
            .field("path", &self.path)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialPortSource {
    /// Open and configure the device.
    pub fn open(config: &SerialConfig) -> Result<Self, SerialError> {
        let path = config.device.clone();

        #[cfg(unix)]
        if !std::path::Path::new(&path).exists() {
            return Err(SerialError::DeviceUnavailable {
                path,
                reason: "no such device".into(),
            });
        }

        let mut port = serialport::new(&path, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .flow_control(FlowControl::None)
            .open()
            .map_err(|err| open_error(&path, err))?;

        // Some CDC devices hold output until DTR is raised.
        if let Err(err) = port.write_data_terminal_ready(true) {
            debug!(device = %path, error = %err, "could not raise DTR");
        }

        info!(device = %path, baud = config.baud_rate, "serial device opened");
        Ok(Self {
            path,
            port: Some(port),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ByteSource for SerialPortSource {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port released"))?;
        match port.read(buf)? {
            // A tty only reports end-of-file once the device has hung up.
            0 => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device hung up",
            )),
            n => Ok(n),
        }
    }

    fn release(&mut self) {
        if self.port.take().is_some() {
            info!(device = %self.path, "serial device released");
        }
    }
}

fn open_error(path: &str, err: serialport::Error) -> SerialError {
    let path = path.to_string();
    let reason = err.description;
    match err.kind {
        serialport::ErrorKind::InvalidInput => SerialError::DeviceConfigError { path, reason },
        serialport::ErrorKind::Io(io::ErrorKind::InvalidInput) => {
            SerialError::DeviceConfigError { path, reason }
        }
        _ => SerialError::DeviceUnavailable { path, reason },
    }
}

/// Adapts any reader into a byte source. End-of-file ends the stream.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: Option<R>,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "source released")),
        }
    }

    fn release(&mut self) {
        self.inner = None;
    }
}
