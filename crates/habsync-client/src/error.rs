//! Transport error carrying the failed request and its status

use std::time::Duration;

use thiserror::Error;

/// Status reported for failures that never produced an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// A failed HTTP exchange.
///
/// Non-2xx responses keep their status; connection, timeout and body read
/// failures use [`TRANSPORT_FAILURE_STATUS`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("HTTP {status_code} for {url}: {message}")]
pub struct HttpError {
    pub url: String,
    pub status_code: u16,
    pub message: String,
    /// Delay the server asked for before retrying (`Retry-After`)
    pub retry_after: Option<Duration>,
}

impl HttpError {
    pub fn new(url: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(url, TRANSPORT_FAILURE_STATUS, message)
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }
}

impl From<HttpError> for habsync_core::Error {
    fn from(err: HttpError) -> Self {
        habsync_core::Error::transport(err.to_string())
    }
}
