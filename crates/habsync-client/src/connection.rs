//! The transport seam between the sync engine and the server

use std::time::Duration;

use url::Url;

use crate::error::HttpError;
use crate::sse::EventStream;

/// A GET request issued by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A successful (2xx) response with its body read to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(url: Url, status: u16, body: impl Into<String>) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Operations the sync engine needs from an HTTP client.
///
/// Non-2xx statuses are reported as [`HttpError`]s carrying the status.
/// Implementations must be cheap to share behind an `Arc`; the engine
/// compares clients by pointer identity to detect a client change.
#[trait_variant::make(Connection: Send)]
pub trait LocalConnection {
    /// Resolve `path` against the server base URL. Absolute URLs pass
    /// through unchanged.
    fn build_url(&self, path: &str) -> Result<Url, HttpError>;

    /// Issue a GET request and read the body as text.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;

    /// POST `body` with the given content type.
    async fn post(
        &self,
        url: Url,
        body: String,
        content_type: &'static str,
    ) -> Result<HttpResponse, HttpError>;

    /// Open a server-sent event stream.
    async fn open_event_stream(&self, url: Url) -> Result<EventStream, HttpError>;
}

/// Shared URL resolution for [`Connection::build_url`] implementations.
pub fn resolve_url(base: &Url, path: &str) -> Result<Url, HttpError> {
    if let Ok(absolute) = Url::parse(path) {
        return Ok(absolute);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| HttpError::new(path, 0, format!("invalid URL: {e}")))
}

/// Base URL normalized to end with a slash so relative paths append to it
pub fn normalize_base_url(base: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_against_base_with_prefix() {
        let base = normalize_base_url("http://demo:8080/openhab").unwrap();
        assert_eq!(base.as_str(), "http://demo:8080/openhab/");
        let url = resolve_url(&base, "/rest/sitemaps/events/subscribe").unwrap();
        assert_eq!(url.as_str(), "http://demo:8080/openhab/rest/sitemaps/events/subscribe");
    }

    #[test]
    fn test_resolve_absolute_passes_through() {
        let base = normalize_base_url("http://demo:8080/").unwrap();
        let url = resolve_url(&base, "https://other/rest/sitemaps/demo/0001").unwrap();
        assert_eq!(url.as_str(), "https://other/rest/sitemaps/demo/0001");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let base = normalize_base_url("http://demo/").unwrap();
        let response =
            HttpResponse::new(base, 200, "").with_header("X-Atmosphere-tracking-id", "abc123");
        assert_eq!(response.header("x-atmosphere-tracking-id"), Some("abc123"));
        assert_eq!(response.header("Location"), None);
    }
}
