// Log Appender
//
// Forwards records to a single remote log in order and reports an
// outcome for each one. At most one append is in flight: `append`
// takes `&mut self`, so the next call cannot start before the
// previous outcome has been returned.
//
// Failed appends are reported, not retried. A failure does not hold
// back later records.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::http::HttpLogService;
use super::store::LogService;
use super::{AppendMode, AppendOptions, AppendOutcome, Cursor, LogError, LogTarget};
use crate::config::{LogConfig, OpenMode};
use crate::invariants::{Checkpoint, InvariantEngine};
use crate::record::{LineRecord, Sequence};

#[derive(Debug)]
pub struct LogAppender<S: LogService> {
    service: S,
    target: LogTarget,
    invariants: InvariantEngine,
    last_sequence: Option<Sequence>,
    closed: bool,
}

impl LogAppender<HttpLogService> {
    /// Open a session to `log_name` on the HTTP log service at
    /// `server_address`. The log must already exist.
    pub async fn connect(server_address: &str, log_name: &str) -> Result<Self, LogError> {
        Self::connect_with_config(&LogConfig::new(server_address, log_name)).await
    }

    pub async fn connect_with_config(config: &LogConfig) -> Result<Self, LogError> {
        let service = HttpLogService::from_config(config)?;
        Self::open(service, config).await
    }
}

impl<S: LogService> LogAppender<S> {
    /// Resolve (or create, per `open_mode`) the configured log on
    /// `service` and start appending after its current end.
    pub async fn open(service: S, config: &LogConfig) -> Result<Self, LogError> {
        let cursor = match config.open_mode {
            OpenMode::AppendExisting => service.open(&config.name).await?,
            OpenMode::CreateIfMissing => match service.open(&config.name).await {
                Err(LogError::LogNotFound { .. }) => {
                    info!(log = %config.name, log_server = ?config.log_server, "creating log");
                    service
                        .create(&config.name, config.log_server.as_deref())
                        .await?
                }
                other => other?,
            },
        };

        info!(
            server = service.address(),
            log = %config.name,
            cursor,
            "log session established"
        );

        Ok(Self {
            target: LogTarget::new(service.address(), config.name.clone(), cursor),
            service,
            invariants: InvariantEngine::ordering(),
            last_sequence: None,
            closed: false,
        })
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    pub fn cursor(&self) -> Cursor {
        self.target.cursor()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            sequence: self.last_sequence,
            cursor: self.target.cursor(),
        }
    }

    /// Append `record` as the next entry of the log.
    ///
    /// On success the local cursor moves to the cursor the log
    /// acknowledged. In strict mode that is always the previous cursor
    /// plus one; in blind mode entries written by others may sit in
    /// between.
    pub async fn append(&mut self, record: &LineRecord, options: &AppendOptions) -> AppendOutcome {
        let sequence = record.sequence();
        let correlation = options.correlation;
        let failed = |cause: LogError| AppendOutcome::Failed {
            sequence,
            correlation,
            cause,
        };

        if self.closed {
            return failed(LogError::SessionClosed);
        }

        let previous = self.checkpoint();
        if let Err(violation) = self.invariants.admit(&previous, record) {
            warn!(sequence, %violation, "record not sent");
            return failed(LogError::OutOfOrder(violation.to_string()));
        }
        self.last_sequence = Some(sequence);

        let expected = match options.mode {
            AppendMode::StrictAppend => Some(previous.cursor),
            AppendMode::BlindAppend => None,
        };

        let cursor = match self
            .service
            .append(self.target.name(), record.payload(), expected)
            .await
        {
            Ok(cursor) => cursor,
            Err(cause) => return failed(cause),
        };

        let next = Checkpoint {
            sequence: Some(sequence),
            cursor,
        };
        if let Err(violation) = self.invariants.commit(&previous, record, &next) {
            return failed(LogError::IndeterminateOutcome {
                reason: violation.to_string(),
            });
        }

        if cursor > previous.cursor + 1 {
            debug!(
                from = previous.cursor,
                to = cursor,
                "log advanced past entries from other writers"
            );
        }
        self.target.advance_to(cursor);

        AppendOutcome::Appended {
            sequence,
            cursor,
            correlation,
        }
    }

    /// Like [`append`](Self::append), but gives up when `cancel` fires.
    ///
    /// An append abandoned mid-flight may or may not have reached the
    /// log, so it is reported as `IndeterminateOutcome`.
    pub async fn append_until_cancelled(
        &mut self,
        record: &LineRecord,
        options: &AppendOptions,
        cancel: &CancellationToken,
    ) -> AppendOutcome {
        let sequence = record.sequence();
        let correlation = options.correlation;

        tokio::select! {
            biased;
            outcome = self.append(record, options) => outcome,
            _ = cancel.cancelled() => AppendOutcome::Failed {
                sequence,
                correlation,
                cause: LogError::IndeterminateOutcome {
                    reason: "shutdown while append was in flight".into(),
                },
            },
        }
    }

    /// Release the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(
            log = self.target.name(),
            cursor = self.target.cursor(),
            "log session closed"
        );
    }
}
