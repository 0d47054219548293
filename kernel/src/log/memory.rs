// In-Memory Log Service
//
// Keeps every log in process memory. Backs dry runs and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::store::LogService;
use super::{Cursor, LogError};

#[derive(Debug, Default)]
struct Inner {
    logs: HashMap<String, Vec<Vec<u8>>>,
    injected: VecDeque<LogError>,
}

/// Shared in-memory log service. Clones see the same logs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogService {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryLogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create an empty log.
    #[must_use]
    pub fn with_log(self, name: &str) -> Self {
        self.lock().logs.entry(name.to_string()).or_default();
        self
    }

    /// Entries of a log in append order.
    pub fn entries(&self, name: &str) -> Option<Vec<Vec<u8>>> {
        self.lock().logs.get(name).cloned()
    }

    /// Make the next append fail with `error` without touching the log.
    pub fn inject_failure(&self, error: LogError) {
        self.lock().injected.push_back(error);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LogService for InMemoryLogService {
    fn address(&self) -> &str {
        "memory"
    }

    async fn open(&self, name: &str) -> Result<Cursor, LogError> {
        self.lock()
            .logs
            .get(name)
            .map(|entries| entries.len() as Cursor)
            .ok_or_else(|| LogError::LogNotFound {
                name: name.to_string(),
            })
    }

    async fn create(&self, name: &str, _log_server: Option<&str>) -> Result<Cursor, LogError> {
        let mut inner = self.lock();
        let entries = inner.logs.entry(name.to_string()).or_default();
        Ok(entries.len() as Cursor)
    }

    async fn append(
        &self,
        name: &str,
        payload: &[u8],
        expected: Option<Cursor>,
    ) -> Result<Cursor, LogError> {
        let mut inner = self.lock();
        if let Some(error) = inner.injected.pop_front() {
            return Err(error);
        }

        let entries = inner
            .logs
            .get_mut(name)
            .ok_or_else(|| LogError::LogNotFound {
                name: name.to_string(),
            })?;

        let current = entries.len() as Cursor;
        if let Some(expected) = expected {
            if expected != current {
                return Err(LogError::AppendRejected {
                    reason: format!(
                        "log modified concurrently: expected cursor {expected}, log is at {current}"
                    ),
                });
            }
        }

        entries.push(payload.to_vec());
        Ok(current + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_missing_log_fails() {
        let service = InMemoryLogService::new();
        let err = service.open("sensors").await.unwrap_err();
        assert_eq!(
            err,
            LogError::LogNotFound {
                name: "sensors".into()
            }
        );
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let service = InMemoryLogService::new();
        assert_eq!(service.create("sensors", Some("edge-01")).await.unwrap(), 0);
        service.append("sensors", b"a", None).await.unwrap();
        assert_eq!(service.create("sensors", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn append_returns_increasing_cursors() {
        let service = InMemoryLogService::new().with_log("sensors");
        assert_eq!(service.append("sensors", b"a", None).await.unwrap(), 1);
        assert_eq!(service.append("sensors", b"b", Some(1)).await.unwrap(), 2);
        assert_eq!(
            service.entries("sensors").unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[tokio::test]
    async fn stale_expected_cursor_is_rejected() {
        let service = InMemoryLogService::new().with_log("sensors");
        service.append("sensors", b"a", None).await.unwrap();

        let err = service.append("sensors", b"b", Some(0)).await.unwrap_err();
        assert!(matches!(err, LogError::AppendRejected { .. }));
        assert_eq!(service.entries("sensors").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let service = InMemoryLogService::new().with_log("sensors");
        service.inject_failure(LogError::AppendRejected {
            reason: "injected".into(),
        });

        assert!(service.append("sensors", b"a", None).await.is_err());
        assert_eq!(service.append("sensors", b"b", None).await.unwrap(), 1);
        assert_eq!(service.entries("sensors").unwrap(), vec![b"b".to_vec()]);
    }
}
