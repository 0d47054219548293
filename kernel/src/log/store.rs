// Log Service Abstraction
//
// Defines the contract of the remote append-only log as seen by
// the appender. Implementations may talk HTTP, keep entries in
// memory, etc.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Cursor, LogError};

/// Remote append-only log service.
///
/// Properties required from implementations:
/// - Append-only
/// - Ordered
/// - Each successful append returns a cursor greater than any
///   cursor returned before for the same log
///
/// Implementations MUST NOT:
/// - Reorder entries
/// - Mutate existing entries
/// - Retry an append on their own
#[async_trait]
pub trait LogService: Send + Sync {
    /// Address used in diagnostics.
    fn address(&self) -> &str;

    /// Resolve an existing log and return its current cursor.
    ///
    /// Fails with `LogNotFound` when the log does not exist.
    async fn open(&self, name: &str) -> Result<Cursor, LogError>;

    /// Create a log, or resolve it if it already exists.
    async fn create(&self, name: &str, log_server: Option<&str>) -> Result<Cursor, LogError>;

    /// Append one opaque entry.
    ///
    /// With `expected = Some(c)` the service must reject the append
    /// unless the log is currently at cursor `c`.
    async fn append(
        &self,
        name: &str,
        payload: &[u8],
        expected: Option<Cursor>,
    ) -> Result<Cursor, LogError>;
}

#[async_trait]
impl<T: LogService + ?Sized> LogService for Arc<T> {
    fn address(&self) -> &str {
        (**self).address()
    }

    async fn open(&self, name: &str) -> Result<Cursor, LogError> {
        (**self).open(name).await
    }

    async fn create(&self, name: &str, log_server: Option<&str>) -> Result<Cursor, LogError> {
        (**self).create(name, log_server).await
    }

    async fn append(
        &self,
        name: &str,
        payload: &[u8],
        expected: Option<Cursor>,
    ) -> Result<Cursor, LogError> {
        (**self).append(name, payload, expected).await
    }
}
