// Serial Line Reader
//
// Pulls bytes from a source, frames them, and yields one record per
// call. The sequence is lazy, unbounded and cannot be restarted:
// once it ends, every later call returns `None`.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::framer::LineFramer;
use super::source::{ByteSource, SerialPortSource};
use super::SerialError;
use crate::config::SerialConfig;
use crate::record::LineRecord;

const CHUNK_SIZE: usize = 256;

/// Consecutive transient errors tolerated before the device is
/// considered gone.
const MAX_TRANSIENT_ERRORS: u32 = 64;

enum ReadFailure {
    Idle,
    Transient,
    Fatal,
}

fn classify(err: &std::io::Error) -> ReadFailure {
    use std::io::ErrorKind::*;
    match err.kind() {
        TimedOut | WouldBlock => ReadFailure::Idle,
        Interrupted | InvalidData => ReadFailure::Transient,
        _ => ReadFailure::Fatal,
    }
}

#[derive(Debug)]
pub struct SerialLineReader<S: ByteSource = SerialPortSource> {
    source: S,
    framer: LineFramer,
    cancel: CancellationToken,
    chunk: Vec<u8>,
    finished: bool,
    closed: bool,
}

impl SerialLineReader<SerialPortSource> {
    /// Open a device with default line settings.
    pub fn open(device_path: &str, baud_rate: u32) -> Result<Self, SerialError> {
        let mut config = SerialConfig::new(device_path);
        config.baud_rate = baud_rate;
        Self::open_with_config(&config)
    }

    pub fn open_with_config(config: &SerialConfig) -> Result<Self, SerialError> {
        let source = SerialPortSource::open(config)?;
        Ok(Self::from_source(source, config.buffer_limit))
    }
}

impl<S: ByteSource> SerialLineReader<S> {
    pub fn from_source(source: S, buffer_limit: usize) -> Self {
        Self {
            source,
            framer: LineFramer::new(buffer_limit),
            cancel: CancellationToken::new(),
            chunk: vec![0; CHUNK_SIZE],
            finished: false,
            closed: false,
        }
    }

    /// Stop producing records once `token` is cancelled. Checked
    /// between reads, so latency is bounded by the source's timeout.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Block until the next complete line is available.
    ///
    /// Returns `Ok(None)` when the stream ended, the reader was closed
    /// or cancellation was requested. A disconnect is reported once as
    /// `DeviceDisconnected`; lines framed before it are yielded first.
    pub fn next_line(&mut self) -> Result<Option<LineRecord>, SerialError> {
        let mut transient = 0u32;

        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(record) = self.framer.next_record() {
                return Ok(Some(record));
            }
            if self.finished || self.cancel.is_cancelled() {
                return Ok(None);
            }

            match self.source.read_bytes(&mut self.chunk) {
                Ok(0) => {
                    self.finish();
                    return Ok(None);
                }
                Ok(n) => {
                    transient = 0;
                    self.framer.push(&self.chunk[..n]);
                }
                Err(err) => match classify(&err) {
                    ReadFailure::Idle => continue,
                    ReadFailure::Transient if transient < MAX_TRANSIENT_ERRORS => {
                        transient += 1;
                        warn!(error = %err, attempt = transient, "transient serial read error, retrying");
                    }
                    ReadFailure::Transient | ReadFailure::Fatal => {
                        self.finish();
                        error!(error = %err, "serial device disconnected");
                        return Err(SerialError::DeviceDisconnected {
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }
    }

    /// Release the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.release();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records framed so far, including ones not yet returned.
    pub fn lines_framed(&self) -> u64 {
        self.framer.framed()
    }

    fn finish(&mut self) {
        self.finished = true;
        let dropped = self.framer.discard_pending();
        if dropped > 0 {
            debug!(bytes = dropped, "discarding unterminated trailing fragment");
        }
    }
}

impl<S: ByteSource> Drop for SerialLineReader<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::ReaderSource;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Step {
        Data(&'static [u8]),
        Fail(io::ErrorKind),
    }

    struct Scripted {
        steps: VecDeque<Step>,
        releases: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            let source = Self {
                steps: steps.into(),
                releases: releases.clone(),
            };
            (source, releases)
        }
    }

    impl ByteSource for Scripted {
        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted")),
                None => Ok(0),
            }
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn reads_scenario_over_two_chunks() {
        let (source, _) = Scripted::new(vec![
            Step::Data(b"355\t357\t46"),
            Step::Data(b"4\n358\t354\t462\n"),
        ]);
        let mut reader = SerialLineReader::from_source(source, 1024);

        let first = reader.next_line().unwrap().unwrap();
        let second = reader.next_line().unwrap().unwrap();
        assert_eq!(first.payload(), b"355\t357\t464");
        assert_eq!(second.payload(), b"358\t354\t462");
        assert!(first.sequence() < second.sequence());
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn transient_errors_are_retried() {
        let (source, _) = Scripted::new(vec![
            Step::Data(b"1\t2"),
            Step::Fail(io::ErrorKind::InvalidData),
            Step::Fail(io::ErrorKind::TimedOut),
            Step::Fail(io::ErrorKind::Interrupted),
            Step::Data(b"\t3\n"),
        ]);
        let mut reader = SerialLineReader::from_source(source, 1024);

        let record = reader.next_line().unwrap().unwrap();
        assert_eq!(record.payload(), b"1\t2\t3");
    }

    #[test]
    fn disconnect_ends_the_sequence() {
        let (source, _) = Scripted::new(vec![
            Step::Data(b"a\nb\nc"),
            Step::Fail(io::ErrorKind::BrokenPipe),
            Step::Data(b"\n"),
        ]);
        let mut reader = SerialLineReader::from_source(source, 1024);

        assert_eq!(reader.next_line().unwrap().unwrap().payload(), b"a");
        assert_eq!(reader.next_line().unwrap().unwrap().payload(), b"b");
        let err = reader.next_line().unwrap_err();
        assert!(matches!(err, SerialError::DeviceDisconnected { .. }));
        assert!(reader.next_line().unwrap().is_none());
        assert_eq!(reader.lines_framed(), 2);
    }

    #[test]
    fn unterminated_tail_is_discarded_at_end_of_stream() {
        let source = ReaderSource::new(io::Cursor::new(b"x\ny".to_vec()));
        let mut reader = SerialLineReader::from_source(source, 1024);

        assert_eq!(reader.next_line().unwrap().unwrap().payload(), b"x");
        assert!(reader.next_line().unwrap().is_none());
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let (source, releases) = Scripted::new(vec![Step::Data(b"a\n")]);
        let mut reader = SerialLineReader::from_source(source, 1024);

        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(reader.next_line().unwrap().is_none());
        drop(reader);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn buffered_lines_are_not_returned_after_close() {
        let (source, _) = Scripted::new(vec![Step::Data(b"a\nb\nc\n")]);
        let mut reader = SerialLineReader::from_source(source, 1024);

        assert_eq!(reader.next_line().unwrap().unwrap().payload(), b"a");
        reader.close();
        assert!(reader.next_line().unwrap().is_none());
        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn cancellation_stops_reading() {
        let (source, _) = Scripted::new(vec![Step::Data(b"a\n")]);
        let token = CancellationToken::new();
        let mut reader = SerialLineReader::from_source(source, 1024).with_cancellation(token.clone());

        token.cancel();
        assert!(reader.next_line().unwrap().is_none());
    }
}
