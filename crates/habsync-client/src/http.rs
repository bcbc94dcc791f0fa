//! reqwest-backed [`Connection`]

use std::time::Duration;

use habsync_core::prelude::*;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use url::Url;

use crate::connection::{normalize_base_url, resolve_url, Connection, HttpRequest, HttpResponse};
use crate::error::HttpError;
use crate::sse::{decode_event_stream, EventStream};

/// Default user agent sent with every request
pub const DEFAULT_USER_AGENT: &str = concat!("habsync/", env!("CARGO_PKG_VERSION"));

/// Timeout for requests that are not long-polls (subscription, probing)
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// HTTP client bound to one server base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl HttpClient {
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        user_agent: Option<&str>,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url).map_err(|_| Error::invalid_url(base_url))?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;

        debug!("HTTP client created for {}", base_url);
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => builder.basic_auth(&c.username, c.password.as_ref()),
            None => builder,
        }
    }

    async fn execute(
        &self,
        url: &Url,
        builder: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, HttpError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| HttpError::transport(url.as_str(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let reason = status.canonical_reason().unwrap_or("request failed");
        Err(HttpError::new(url.as_str(), status.as_u16(), reason).with_retry_after(retry_after))
    }

    async fn into_text(
        url: Url,
        response: reqwest::Response,
    ) -> std::result::Result<HttpResponse, HttpError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::transport(url.as_str(), format!("failed to read body: {e}")))?;
        Ok(HttpResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

impl Connection for HttpClient {
    fn build_url(&self, path: &str) -> std::result::Result<Url, HttpError> {
        resolve_url(&self.base_url, path)
    }

    async fn get(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpError> {
        trace!("GET {}", request.url);
        let mut builder = self
            .client
            .get(request.url.clone())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = self.execute(&request.url, builder).await?;
        Self::into_text(request.url, response).await
    }

    async fn post(
        &self,
        url: Url,
        body: String,
        content_type: &'static str,
    ) -> std::result::Result<HttpResponse, HttpError> {
        trace!("POST {}", url);
        let builder = self
            .client
            .post(url.clone())
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        let response = self.execute(&url, builder).await?;
        Self::into_text(url, response).await
    }

    async fn open_event_stream(&self, url: Url) -> std::result::Result<EventStream, HttpError> {
        debug!("Opening event stream {}", url);
        // No timeout: the stream stays open for as long as the page is shown
        let builder = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream");
        let response = self.execute(&url, builder).await?;
        Ok(decode_event_stream(response.bytes_stream(), url.as_str()))
    }
}
