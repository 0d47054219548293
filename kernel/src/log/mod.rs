// Remote Append-Only Log
//
// Types shared by the log leg: the target descriptor, append options
// and the per-record outcome reported to callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::Sequence;

pub mod appender;
pub mod http;
pub mod memory;
pub mod store;

pub use appender::LogAppender;
pub use http::HttpLogService;
pub use memory::InMemoryLogService;
pub use store::LogService;

/// Position of the most recently appended entry. An empty log is at 0.
pub type Cursor = u64;

/// Caller-supplied token echoed back in the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(pub Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppendMode {
    /// Fail if the log moved past the last known cursor.
    StrictAppend,

    /// Append wherever the log currently ends.
    #[default]
    BlindAppend,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    pub mode: AppendMode,
    pub correlation: Option<CorrelationToken>,
}

impl AppendOptions {
    pub fn new(mode: AppendMode) -> Self {
        Self {
            mode,
            correlation: None,
        }
    }

    #[must_use]
    pub fn with_correlation(mut self, token: CorrelationToken) -> Self {
        self.correlation = Some(token);
        self
    }
}

/// Identifies the destination log and tracks the local append cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogTarget {
    server: String,
    name: String,
    cursor: Cursor,
}

impl LogTarget {
    pub fn new(server: impl Into<String>, name: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
            cursor,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Only forward movement is accepted.
    pub(crate) fn advance_to(&mut self, cursor: Cursor) {
        debug_assert!(cursor > self.cursor, "cursor must not regress");
        self.cursor = self.cursor.max(cursor);
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("log service at `{server}` unreachable: {reason}")]
    LogUnreachable { server: String, reason: String },

    #[error("log `{name}` not found")]
    LogNotFound { name: String },

    #[error("append rejected: {reason}")]
    AppendRejected { reason: String },

    #[error("append outcome indeterminate: {reason}")]
    IndeterminateOutcome { reason: String },

    #[error("record out of order: {0}")]
    OutOfOrder(String),

    #[error("log session closed")]
    SessionClosed,

    #[error("invalid log service address `{0}`")]
    InvalidAddress(String),
}

/// Result of one append attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended {
        sequence: Sequence,
        cursor: Cursor,
        correlation: Option<CorrelationToken>,
    },
    Failed {
        sequence: Sequence,
        correlation: Option<CorrelationToken>,
        cause: LogError,
    },
}

impl AppendOutcome {
    pub fn sequence(&self) -> Sequence {
        match self {
            Self::Appended { sequence, .. } | Self::Failed { sequence, .. } => *sequence,
        }
    }

    pub fn correlation(&self) -> Option<CorrelationToken> {
        match self {
            Self::Appended { correlation, .. } | Self::Failed { correlation, .. } => *correlation,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Appended { .. })
    }

    pub fn cursor(&self) -> Option<Cursor> {
        match self {
            Self::Appended { cursor, .. } => Some(*cursor),
            Self::Failed { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&LogError> {
        match self {
            Self::Appended { .. } => None,
            Self::Failed { cause, .. } => Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accessors() {
        let token = CorrelationToken::new();
        let ok = AppendOutcome::Appended {
            sequence: 3,
            cursor: 7,
            correlation: Some(token),
        };
        assert!(ok.is_success());
        assert_eq!(ok.cursor(), Some(7));
        assert_eq!(ok.correlation(), Some(token));
        assert!(ok.cause().is_none());

        let failed = AppendOutcome::Failed {
            sequence: 4,
            correlation: None,
            cause: LogError::SessionClosed,
        };
        assert!(!failed.is_success());
        assert_eq!(failed.sequence(), 4);
        assert_eq!(failed.cause(), Some(&LogError::SessionClosed));
    }

    #[test]
    fn append_mode_uses_kebab_case() {
        let json = serde_json::to_string(&AppendMode::StrictAppend).unwrap();
        assert_eq!(json, "\"strict-append\"");
    }
}
