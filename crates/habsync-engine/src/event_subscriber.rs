//! Server-sent event subscription for one page
//!
//! [`open_page_stream`] performs the two-step handshake: a POST to the
//! subscribe endpoint returns the stream location, which is then opened
//! with the page's sitemap and id as query parameters.
//!
//! [`EventSubscriber`] keeps the per-page retry bookkeeping. The page
//! connection owns the actual futures and stream.

use std::time::Duration;

use habsync_client::{Connection, EventStream, HttpError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::backoff::Backoff;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Subscription endpoint, relative to the server base URL.
pub const SUBSCRIBE_PATH: &str = "rest/sitemaps/events/subscribe";

/// Status the server reports for a freshly created subscription.
const SUBSCRIPTION_CREATED: &str = "CREATED";

// ---------------------------------------------------------------------------
// Subscription handshake
// ---------------------------------------------------------------------------

/// Why a subscription could not be opened.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscribeError {
    /// The server does not offer sitemap events (404, or an answer we do
    /// not understand). Not retried.
    #[error("event stream not supported: {reason}")]
    Unsupported { reason: String },

    /// Transient failure, retried with backoff.
    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    status: String,
    context: SubscribeContext,
}

#[derive(Debug, Deserialize)]
struct SubscribeContext {
    headers: SubscribeHeaders,
}

#[derive(Debug, Deserialize)]
struct SubscribeHeaders {
    #[serde(rename = "Location", default)]
    location: Vec<String>,
}

/// Extract the stream location from a subscribe response body.
fn parse_subscribe_response(body: &str) -> Result<String, SubscribeError> {
    let response: SubscribeResponse =
        serde_json::from_str(body).map_err(|e| SubscribeError::Unsupported {
            reason: format!("unexpected subscribe response: {e}"),
        })?;
    if response.status != SUBSCRIPTION_CREATED {
        return Err(SubscribeError::Unsupported {
            reason: format!("unexpected status {}", response.status),
        });
    }
    response
        .context
        .headers
        .location
        .into_iter()
        .next()
        .ok_or_else(|| SubscribeError::Unsupported {
            reason: "subscribe response without Location".to_string(),
        })
}

/// Subscribe and open the event stream for `sitemap`/`page_id`.
pub async fn open_page_stream<C>(
    connection: &C,
    sitemap: &str,
    page_id: &str,
) -> Result<EventStream, SubscribeError>
where
    C: Connection + Sync,
{
    let subscribe_url = connection.build_url(SUBSCRIBE_PATH)?;
    let response = match connection
        .post(subscribe_url, "{}".to_string(), "application/json")
        .await
    {
        Ok(response) => response,
        Err(e) if e.is_not_found() => {
            debug!("Server does not have event stream support");
            return Err(SubscribeError::Unsupported {
                reason: e.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let location = parse_subscribe_response(&response.body)?;
    let mut stream_url = connection
        .build_url(&location)
        .map_err(|e| SubscribeError::Unsupported { reason: e.message })?;
    stream_url
        .query_pairs_mut()
        .append_pair("sitemap", sitemap)
        .append_pair("pageid", page_id);

    trace!("Subscribed, opening {}", stream_url);
    Ok(connection.open_event_stream(stream_url).await?)
}

// ---------------------------------------------------------------------------
// Retry bookkeeping
// ---------------------------------------------------------------------------

/// What to do after a failed subscription or a lost stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Event stream state of one page.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    sitemap: String,
    page_id: String,
    attempts: u32,
    max_retries: u32,
    backoff: Backoff,
    /// Last `retry:` hint sent on the stream
    server_retry: Option<Duration>,
}

impl EventSubscriber {
    /// Subscriber for the page at `page_url`, taking the sitemap and page id
    /// from its last two path segments.
    ///
    /// Returns `None` for URLs with fewer than three path segments.
    pub fn for_page(page_url: &str, max_retries: u32, backoff: Backoff) -> Option<Self> {
        let url = Url::parse(page_url).ok()?;
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        if segments.len() <= 2 {
            return None;
        }

        let sitemap = segments[segments.len() - 2].to_string();
        let page_id = segments[segments.len() - 1].to_string();
        debug!("Creating event subscriber for sitemap {}, page {}", sitemap, page_id);
        Some(Self {
            sitemap,
            page_id,
            attempts: 0,
            max_retries,
            backoff,
            server_retry: None,
        })
    }

    pub fn sitemap(&self) -> &str {
        &self.sitemap
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Consecutive failures since the last successfully opened stream
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether a `SITEMAP_CHANGED` for `sitemap`/`page_id` concerns this page.
    /// Missing fields match.
    pub fn is_own_change(&self, sitemap: Option<&str>, page_id: Option<&str>) -> bool {
        sitemap.map_or(true, |s| s == self.sitemap) && page_id.map_or(true, |p| p == self.page_id)
    }

    pub fn set_server_retry(&mut self, retry: Duration) {
        self.server_retry = Some(retry);
    }

    pub fn on_stream_opened(&mut self) {
        self.attempts = 0;
    }

    /// Record a failure. The delay prefers the failed response's
    /// `Retry-After`, then the stream's `retry:` hint, then backoff.
    pub fn on_failure(&mut self, retry_after: Option<Duration>) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = retry_after
            .or(self.server_retry)
            .unwrap_or_else(|| self.backoff.delay(self.attempts));
        RetryDecision::Retry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use habsync_client::test_utils::FakeConnection;
    use habsync_client::SseEvent;
    use tokio_test::{assert_err, assert_ok};

    const PAGE_URL: &str = "http://demo:8080/rest/sitemaps/demo/0001";

    fn subscriber(max_retries: u32) -> EventSubscriber {
        EventSubscriber::for_page(PAGE_URL, max_retries, Backoff::default()).unwrap()
    }

    #[test]
    fn test_for_page_takes_last_two_segments() {
        let subscriber = subscriber(10);
        assert_eq!(subscriber.sitemap(), "demo");
        assert_eq!(subscriber.page_id(), "0001");
        assert_eq!(subscriber.attempts(), 0);
    }

    #[test]
    fn test_for_page_requires_three_segments() {
        assert!(EventSubscriber::for_page("http://demo/rest/demo", 10, Backoff::default()).is_none());
        assert!(EventSubscriber::for_page("not a url", 10, Backoff::default()).is_none());
    }

    #[test]
    fn test_retry_bound() {
        let mut subscriber = subscriber(10);
        for attempt in 1..=10 {
            assert!(
                matches!(subscriber.on_failure(None), RetryDecision::Retry(_)),
                "attempt {} should retry",
                attempt
            );
        }
        assert_eq!(subscriber.on_failure(None), RetryDecision::GiveUp);
    }

    #[test]
    fn test_retry_delay_sources() {
        let mut subscriber = subscriber(10);
        assert_eq!(subscriber.on_failure(None), RetryDecision::Retry(Duration::from_secs(1)));
        assert_eq!(subscriber.on_failure(None), RetryDecision::Retry(Duration::from_secs(2)));

        subscriber.set_server_retry(Duration::from_millis(500));
        assert_eq!(
            subscriber.on_failure(None),
            RetryDecision::Retry(Duration::from_millis(500))
        );
        assert_eq!(
            subscriber.on_failure(Some(Duration::from_secs(7))),
            RetryDecision::Retry(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_opened_stream_resets_attempts() {
        let mut subscriber = subscriber(2);
        subscriber.on_failure(None);
        subscriber.on_failure(None);
        subscriber.on_stream_opened();
        assert_eq!(subscriber.attempts(), 0);
        assert!(matches!(subscriber.on_failure(None), RetryDecision::Retry(_)));
    }

    #[test]
    fn test_is_own_change() {
        let subscriber = subscriber(10);
        assert!(subscriber.is_own_change(Some("demo"), Some("0001")));
        assert!(subscriber.is_own_change(None, None));
        assert!(!subscriber.is_own_change(Some("other"), None));
        assert!(!subscriber.is_own_change(Some("demo"), Some("0002")));
    }

    #[test]
    fn test_parse_subscribe_response() {
        let body = r#"{"status":"CREATED","context":{"headers":{"Location":["http://demo:8080/rest/sitemaps/events/f00"]}}}"#;
        assert_eq!(
            parse_subscribe_response(body).unwrap(),
            "http://demo:8080/rest/sitemaps/events/f00"
        );

        let err = parse_subscribe_response(r#"{"status":"OK","context":{"headers":{}}}"#).unwrap_err();
        assert!(matches!(err, SubscribeError::Unsupported { .. }));
        assert!(parse_subscribe_response("<html/>").is_err());
    }

    #[tokio::test]
    async fn test_open_page_stream() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let open = tokio::spawn(async move {
            let mut stream = open_page_stream(&connection, "demo", "0001").await?;
            Ok::<_, SubscribeError>(stream.next().await)
        });

        let post = server.next_post().await.unwrap();
        assert_eq!(post.url.as_str(), "http://demo:8080/rest/sitemaps/events/subscribe");
        assert_eq!(post.body, "{}");
        assert_eq!(post.content_type, "application/json");
        post.respond(
            r#"{"status":"CREATED","context":{"headers":{"Location":["http://demo:8080/rest/sitemaps/events/f00"]}}}"#,
        );

        let pending = server.next_stream().await.unwrap();
        assert_eq!(
            pending.url.as_str(),
            "http://demo:8080/rest/sitemaps/events/f00?sitemap=demo&pageid=0001"
        );
        let handle = pending.accept();
        handle.send_data(r#"{"TYPE":"ALIVE"}"#);

        let first = assert_ok!(open.await.unwrap());
        assert_eq!(first, Some(Ok(SseEvent::data(r#"{"TYPE":"ALIVE"}"#))));
    }

    #[tokio::test]
    async fn test_open_page_stream_not_found_is_unsupported() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let open = tokio::spawn(async move {
            open_page_stream(&connection, "demo", "0001").await.map(|_| ())
        });

        server.next_post().await.unwrap().fail(404);
        let err = assert_err!(open.await.unwrap());
        assert!(matches!(err, SubscribeError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_open_page_stream_server_error_is_transient() {
        let (connection, mut server) = FakeConnection::new("http://demo:8080/");
        let open = tokio::spawn(async move {
            open_page_stream(&connection, "demo", "0001").await.map(|_| ())
        });

        server.next_post().await.unwrap().fail(503);
        let err = assert_err!(open.await.unwrap());
        match err {
            SubscribeError::Http(e) => assert_eq!(e.status_code, 503),
            other => panic!("unexpected {:?}", other),
        }
    }
}
