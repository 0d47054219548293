//! HTTP client for a remote append-only log service.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET  /api/v1/logs/{name}`: resolve a log, `{"cursor": n}`
//! - `PUT  /api/v1/logs/{name}`: create a log, body `{"log_server": ...}`
//! - `POST /api/v1/logs/{name}/append[?expected_cursor=n]`: append the
//!   raw request body as one entry, `{"cursor": n}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::LogService;
use super::{Cursor, LogError};
use crate::config::LogConfig;

#[derive(Debug, Deserialize)]
struct CursorResponse {
    cursor: Cursor,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    log_server: Option<&'a str>,
}

/// Log service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLogService {
    base_url: String,
    http: HttpClient,
}

impl HttpLogService {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` unless the URL is `http://` or `https://`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LogError> {
        let base_url = base_url.into();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(LogError::InvalidAddress(base_url));
        }
        Url::parse(&base_url).map_err(|_| LogError::InvalidAddress(base_url.clone()))?;

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LogError::LogUnreachable {
                server: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { base_url, http })
    }

    pub fn from_config(config: &LogConfig) -> Result<Self, LogError> {
        Self::new(
            config.server.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Build `{base}/api/v1/logs/{name}[/{suffix}]` with the name
    /// percent-encoded as a single path segment.
    fn url(&self, name: &str, suffix: Option<&str>) -> Result<Url, LogError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|_| LogError::InvalidAddress(self.base_url.clone()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| LogError::InvalidAddress(self.base_url.clone()))?;
            segments.pop_if_empty().extend(["api", "v1", "logs", name]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn unreachable(&self, reason: impl ToString) -> LogError {
        LogError::LogUnreachable {
            server: self.base_url.clone(),
            reason: reason.to_string(),
        }
    }

    async fn read_cursor(&self, response: Response) -> Result<Cursor, LogError> {
        response
            .json::<CursorResponse>()
            .await
            .map(|body| body.cursor)
            .map_err(|e| self.unreachable(format!("invalid response body: {e}")))
    }
}

/// Pull a human-readable message out of an error response.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|json| {
            json["error"]
                .as_str()
                .or_else(|| json["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);

    if message.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), message)
    }
}

#[async_trait]
impl LogService for HttpLogService {
    fn address(&self) -> &str {
        &self.base_url
    }

    async fn open(&self, name: &str) -> Result<Cursor, LogError> {
        let url = self.url(name, None)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match response.status() {
            status if status.is_success() => self.read_cursor(response).await,
            StatusCode::NOT_FOUND => Err(LogError::LogNotFound {
                name: name.to_string(),
            }),
            _ => Err(self.unreachable(error_message(response).await)),
        }
    }

    async fn create(&self, name: &str, log_server: Option<&str>) -> Result<Cursor, LogError> {
        let url = self.url(name, None)?;
        let response = self
            .http
            .put(url)
            .json(&CreateRequest { log_server })
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match response.status() {
            status if status.is_success() => self.read_cursor(response).await,
            StatusCode::CONFLICT => {
                debug!(log = name, "log already exists");
                self.open(name).await
            }
            _ => Err(self.unreachable(error_message(response).await)),
        }
    }

    async fn append(
        &self,
        name: &str,
        payload: &[u8],
        expected: Option<Cursor>,
    ) -> Result<Cursor, LogError> {
        let url = self.url(name, Some("append"))?;
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec());
        if let Some(expected) = expected {
            request = request.query(&[("expected_cursor", expected)]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                self.unreachable(e)
            } else {
                LogError::IndeterminateOutcome {
                    reason: e.to_string(),
                }
            }
        })?;

        match response.status() {
            status if status.is_success() => response
                .json::<CursorResponse>()
                .await
                .map(|body| body.cursor)
                .map_err(|e| LogError::IndeterminateOutcome {
                    reason: format!("unreadable acknowledgement: {e}"),
                }),
            StatusCode::NOT_FOUND => Err(LogError::LogNotFound {
                name: name.to_string(),
            }),
            StatusCode::CONFLICT => {
                let message = error_message(response).await;
                Err(LogError::AppendRejected {
                    reason: format!("log modified concurrently ({message})"),
                })
            }
            _ => {
                let reason = error_message(response).await;
                Err(LogError::AppendRejected { reason })
            }
        }
    }
}
