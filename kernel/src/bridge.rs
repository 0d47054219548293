// Serial-to-Log Bridge
//
// Runs the full pipeline for one device and one log:
// serial device → framer → bounded queue → appender → remote log
//
// A blocking reader task pulls lines off the device and hands them
// to a single consumer task that appends them one at a time. When
// the queue is full the reader blocks; nothing is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{BridgeConfig, ConfigError, SerialConfig};
use crate::log::{
    AppendOptions, AppendOutcome, Cursor, HttpLogService, LogAppender, LogError, LogService,
};
use crate::record::LineRecord;
use crate::serial::{ByteSource, SerialError, SerialLineReader, SerialPortSource};
use crate::state::{BridgeEvent, BridgeState, BridgeStateMachine, StateError};

/// Receives every framed line, every append outcome and every state
/// change. Called from both the reader and the consumer task.
pub trait BridgeObserver: Send + Sync {
    fn on_line(&self, _record: &LineRecord) {}

    fn on_outcome(&self, _outcome: &AppendOutcome) {}

    fn on_state(&self, _state: BridgeState) {}
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BridgeObserver for TracingObserver {
    fn on_line(&self, record: &LineRecord) {
        info!(sequence = record.sequence(), data = %record.text(), "line received");
    }

    fn on_outcome(&self, outcome: &AppendOutcome) {
        match outcome {
            AppendOutcome::Appended {
                sequence, cursor, ..
            } => debug!(sequence, cursor, "record appended"),
            AppendOutcome::Failed {
                sequence, cause, ..
            } => warn!(sequence, %cause, "append failed"),
        }
    }

    fn on_state(&self, state: BridgeState) {
        debug!(?state, "bridge state changed");
    }
}

/// Why streaming stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    /// The input stream ended cleanly.
    EndOfInput,

    /// Shutdown was requested.
    Shutdown,

    /// The device went away. Needs an operator restart.
    DeviceDisconnected { detail: String },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeReport {
    pub session: Uuid,
    pub state: BridgeState,
    pub ended_by: EndReason,
    /// Lines framed by the reader.
    pub lines: u64,
    pub appended: u64,
    pub failed: u64,
    /// Lines framed but never sent: still queued at shutdown, or
    /// rejected by the closed queue.
    pub abandoned: u64,
    /// Cursor after the last successful append.
    pub cursor: Cursor,
}

impl BridgeReport {
    pub fn is_disconnected(&self) -> bool {
        matches!(self.ended_by, EndReason::DeviceDisconnected { .. })
    }
}

/// Errors that stop the bridge from running.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serial error: {0}")]
    Serial(#[from] SerialError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("state machine error: {0}")]
    State(#[from] StateError),

    #[error("shutdown requested before the bridge was connected")]
    ShutdownDuringConnect,
}

#[derive(Default)]
struct ReaderCounters {
    framed: AtomicU64,
    rejected: AtomicU64,
}

enum ReaderEvent {
    Line(LineRecord),
    Ended,
    Disconnected(SerialError),
}

/// One serial device bridged to one remote log.
pub struct Bridge {
    config: BridgeConfig,
    observer: Arc<dyn BridgeObserver>,
    cancel: CancellationToken,
    machine: BridgeStateMachine,
    session: Uuid,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
            machine: BridgeStateMachine::new(),
            session: Uuid::new_v4(),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BridgeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that closes the bridge when cancelled. Cancelling it
    /// interrupts a pending read or append.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn state(&self) -> BridgeState {
        self.machine.current_state()
    }

    /// Bridge the configured serial device to the configured HTTP log.
    pub async fn run(self) -> Result<BridgeReport, BridgeError> {
        let service = HttpLogService::from_config(&self.config.log)?;
        self.run_with(SerialLineReader::<SerialPortSource>::open_with_config, service)
            .await
    }

    /// Run with a custom reader and log service.
    pub async fn run_with<S, L, F>(
        self,
        open_reader: F,
        service: L,
    ) -> Result<BridgeReport, BridgeError>
    where
        S: ByteSource + 'static,
        L: LogService,
        F: FnOnce(&SerialConfig) -> Result<SerialLineReader<S>, SerialError>,
    {
        let span = info_span!(
            "bridge",
            session = %self.session,
            device = %self.config.serial.device,
            log = %self.config.log.name,
        );
        self.stream(open_reader, service).instrument(span).await
    }

    fn transition(&mut self, event: BridgeEvent) -> Result<BridgeState, StateError> {
        let state = self.machine.apply(event)?;
        self.observer.on_state(state);
        Ok(state)
    }

    async fn stream<S, L, F>(mut self, open_reader: F, service: L) -> Result<BridgeReport, BridgeError>
    where
        S: ByteSource + 'static,
        L: LogService,
        F: FnOnce(&SerialConfig) -> Result<SerialLineReader<S>, SerialError>,
    {
        // ----------------------------
        // Connect both legs
        // ----------------------------
        self.transition(BridgeEvent::Start)?;

        let mut reader = match open_reader(&self.config.serial) {
            Ok(reader) => reader,
            Err(err) => {
                error!(error = %err, "could not open serial device");
                self.transition(BridgeEvent::ConnectFailed)?;
                return Err(err.into());
            }
        };

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = LogAppender::open(service, &self.config.log) => Some(result),
        };
        let mut appender = match connected {
            Some(Ok(appender)) => appender,
            Some(Err(err)) => {
                error!(error = %err, "could not connect to log");
                reader.close();
                self.transition(BridgeEvent::ConnectFailed)?;
                return Err(err.into());
            }
            None => {
                reader.close();
                self.transition(BridgeEvent::ConnectFailed)?;
                return Err(BridgeError::ShutdownDuringConnect);
            }
        };

        self.transition(BridgeEvent::Connected)?;
        info!(cursor = appender.cursor(), "streaming");

        // ----------------------------
        // Reader task
        // ----------------------------
        let reader_stop = self.cancel.child_token();
        let reader = reader.with_cancellation(reader_stop.clone());
        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity);
        let counters = Arc::new(ReaderCounters::default());
        let reader_task = {
            let observer = self.observer.clone();
            let counters = counters.clone();
            tokio::task::spawn_blocking(move || pump(reader, tx, observer, counters))
        };

        // ----------------------------
        // Append loop
        // ----------------------------
        let options = AppendOptions::new(self.config.log.mode);
        let (mut appended, mut failed) = (0u64, 0u64);

        let ended_by = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break EndReason::Shutdown,
                event = rx.recv() => event,
            };

            match event {
                Some(ReaderEvent::Line(record)) => {
                    let outcome = appender
                        .append_until_cancelled(&record, &options, &self.cancel)
                        .await;
                    if outcome.is_success() {
                        appended += 1;
                    } else {
                        failed += 1;
                    }
                    self.observer.on_outcome(&outcome);
                }
                Some(ReaderEvent::Ended) | None => break EndReason::EndOfInput,
                Some(ReaderEvent::Disconnected(err)) => {
                    break EndReason::DeviceDisconnected {
                        detail: err.to_string(),
                    }
                }
            }
        };

        // ----------------------------
        // Wind down
        // ----------------------------
        let event = match ended_by {
            EndReason::EndOfInput => BridgeEvent::InputEnded,
            EndReason::Shutdown => BridgeEvent::ShutdownRequested,
            EndReason::DeviceDisconnected { .. } => BridgeEvent::DeviceLost,
        };
        self.transition(event)?;

        reader_stop.cancel();
        rx.close();
        let mut abandoned = 0u64;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ReaderEvent::Line(_)) {
                abandoned += 1;
            }
        }

        let grace = Duration::from_millis(self.config.serial.read_timeout_ms) + Duration::from_secs(1);
        match tokio::time::timeout(grace, reader_task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "reader task failed"),
            Err(_) => warn!("reader still blocked; device is released once the read returns"),
        }

        // Lines framed after the queue closed never made it in.
        abandoned += counters.rejected.load(Ordering::SeqCst);
        if abandoned > 0 {
            warn!(abandoned, "framed records were not sent");
        }

        appender.close();
        let state = self.transition(BridgeEvent::Released)?;

        let report = BridgeReport {
            session: self.session,
            state,
            ended_by,
            lines: counters.framed.load(Ordering::SeqCst),
            appended,
            failed,
            abandoned,
            cursor: appender.cursor(),
        };
        info!(
            lines = report.lines,
            appended = report.appended,
            failed = report.failed,
            cursor = report.cursor,
            "bridge closed"
        );
        Ok(report)
    }
}

/// Body of the reader task. Runs on a blocking thread.
fn pump<S: ByteSource>(
    mut reader: SerialLineReader<S>,
    tx: mpsc::Sender<ReaderEvent>,
    observer: Arc<dyn BridgeObserver>,
    counters: Arc<ReaderCounters>,
) {
    loop {
        let event = match reader.next_line() {
            Ok(Some(record)) => {
                counters.framed.fetch_add(1, Ordering::SeqCst);
                observer.on_line(&record);
                ReaderEvent::Line(record)
            }
            Ok(None) => ReaderEvent::Ended,
            Err(err) => ReaderEvent::Disconnected(err),
        };
        let last = !matches!(event, ReaderEvent::Line(_));

        // Blocks while the queue is full.
        if let Err(mpsc::error::SendError(event)) = tx.blocking_send(event) {
            if matches!(event, ReaderEvent::Line(_)) {
                counters.rejected.fetch_add(1, Ordering::SeqCst);
            }
            break;
        }
        if last {
            break;
        }
    }
    reader.close();
}
