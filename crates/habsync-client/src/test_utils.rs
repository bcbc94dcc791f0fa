//! Test utilities for transport-dependent code
//!
//! [`FakeConnection`] implements [`Connection`] without a network. Every call
//! is handed to the paired [`FakeServer`] as a pending exchange that the test
//! answers explicitly. A pending exchange whose caller gave up (the request
//! future was dropped) reports [`PendingGet::is_cancelled`].

use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::connection::{normalize_base_url, resolve_url, Connection, HttpRequest, HttpResponse};
use crate::error::HttpError;
use crate::sse::{EventStream, SseEvent};

type Reply = oneshot::Sender<Result<HttpResponse, HttpError>>;

/// Client half: give this to the code under test.
#[derive(Debug)]
pub struct FakeConnection {
    base_url: Url,
    gets: mpsc::UnboundedSender<PendingGet>,
    posts: mpsc::UnboundedSender<PendingPost>,
    streams: mpsc::UnboundedSender<PendingStream>,
}

/// Server half: the test receives requests here and answers them.
#[derive(Debug)]
pub struct FakeServer {
    pub gets: mpsc::UnboundedReceiver<PendingGet>,
    pub posts: mpsc::UnboundedReceiver<PendingPost>,
    pub streams: mpsc::UnboundedReceiver<PendingStream>,
}

impl FakeConnection {
    /// Creates a connected client/server pair.
    ///
    /// # Panics
    /// Panics if `base_url` is not a valid URL.
    pub fn new(base_url: &str) -> (FakeConnection, FakeServer) {
        let (gets_tx, gets_rx) = mpsc::unbounded_channel();
        let (posts_tx, posts_rx) = mpsc::unbounded_channel();
        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        let connection = FakeConnection {
            base_url: normalize_base_url(base_url).expect("valid fake base URL"),
            gets: gets_tx,
            posts: posts_tx,
            streams: streams_tx,
        };
        let server = FakeServer {
            gets: gets_rx,
            posts: posts_rx,
            streams: streams_rx,
        };
        (connection, server)
    }
}

fn dropped(url: &Url) -> HttpError {
    HttpError::transport(url.as_str(), "fake server dropped the request")
}

impl Connection for FakeConnection {
    fn build_url(&self, path: &str) -> Result<Url, HttpError> {
        resolve_url(&self.base_url, path)
    }

    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let (reply, response) = oneshot::channel();
        let url = request.url.clone();
        self.gets
            .send(PendingGet { request, reply })
            .map_err(|_| dropped(&url))?;
        response.await.unwrap_or_else(|_| Err(dropped(&url)))
    }

    async fn post(
        &self,
        url: Url,
        body: String,
        content_type: &'static str,
    ) -> Result<HttpResponse, HttpError> {
        let (reply, response) = oneshot::channel();
        let pending = PendingPost {
            url: url.clone(),
            body,
            content_type,
            reply,
        };
        self.posts.send(pending).map_err(|_| dropped(&url))?;
        response.await.unwrap_or_else(|_| Err(dropped(&url)))
    }

    async fn open_event_stream(&self, url: Url) -> Result<EventStream, HttpError> {
        let (reply, response) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = PendingStream {
            url: url.clone(),
            events: events_tx,
            reply,
        };
        self.streams.send(pending).map_err(|_| dropped(&url))?;
        response.await.unwrap_or_else(|_| Err(dropped(&url)))?;

        let events = stream::unfold(events_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(events.boxed())
    }
}

impl FakeServer {
    pub async fn next_get(&mut self) -> Option<PendingGet> {
        self.gets.recv().await
    }

    pub async fn next_post(&mut self) -> Option<PendingPost> {
        self.posts.recv().await
    }

    pub async fn next_stream(&mut self) -> Option<PendingStream> {
        self.streams.recv().await
    }

    /// Non-blocking check for a GET that has already been issued
    pub fn try_next_get(&mut self) -> Option<PendingGet> {
        self.gets.try_recv().ok()
    }

    pub fn try_next_post(&mut self) -> Option<PendingPost> {
        self.posts.try_recv().ok()
    }

    pub fn try_next_stream(&mut self) -> Option<PendingStream> {
        self.streams.try_recv().ok()
    }
}

/// A GET awaiting the test's answer
#[derive(Debug)]
pub struct PendingGet {
    pub request: HttpRequest,
    reply: Reply,
}

impl PendingGet {
    /// Answer 200 with `body`.
    pub fn respond(self, body: &str) {
        let response = HttpResponse::new(self.request.url.clone(), 200, body);
        let _ = self.reply.send(Ok(response));
    }

    /// Answer 200 with `body` and extra headers.
    pub fn respond_with_headers(self, body: &str, headers: &[(&str, &str)]) {
        let mut response = HttpResponse::new(self.request.url.clone(), 200, body);
        for (name, value) in headers {
            response = response.with_header(*name, *value);
        }
        let _ = self.reply.send(Ok(response));
    }

    /// Answer with an error status.
    pub fn fail(self, status_code: u16) {
        let err = HttpError::new(self.request.url.as_str(), status_code, "fake failure");
        let _ = self.reply.send(Err(err));
    }

    /// Whether the caller dropped the request future
    pub fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }
}

/// A POST awaiting the test's answer
#[derive(Debug)]
pub struct PendingPost {
    pub url: Url,
    pub body: String,
    pub content_type: &'static str,
    reply: Reply,
}

impl PendingPost {
    pub fn respond(self, body: &str) {
        let response = HttpResponse::new(self.url.clone(), 200, body);
        let _ = self.reply.send(Ok(response));
    }

    pub fn fail(self, status_code: u16) {
        let err = HttpError::new(self.url.as_str(), status_code, "fake failure");
        let _ = self.reply.send(Err(err));
    }

    pub fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }
}

/// An event stream connection awaiting the test's answer
#[derive(Debug)]
pub struct PendingStream {
    pub url: Url,
    events: mpsc::UnboundedSender<Result<SseEvent, HttpError>>,
    reply: oneshot::Sender<Result<(), HttpError>>,
}

impl PendingStream {
    /// Accept the stream; events sent through the returned handle are
    /// delivered to the client, and dropping it closes the stream.
    pub fn accept(self) -> StreamHandle {
        let _ = self.reply.send(Ok(()));
        StreamHandle {
            events: self.events,
        }
    }

    pub fn fail(self, status_code: u16) {
        let err = HttpError::new(self.url.as_str(), status_code, "fake failure");
        let _ = self.reply.send(Err(err));
    }

    pub fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }
}

/// Open fake event stream
#[derive(Debug)]
pub struct StreamHandle {
    events: mpsc::UnboundedSender<Result<SseEvent, HttpError>>,
}

impl StreamHandle {
    /// Push an event with the given `data` payload.
    pub fn send_data(&self, data: &str) -> bool {
        self.events.send(Ok(SseEvent::data(data))).is_ok()
    }

    pub fn send(&self, event: SseEvent) -> bool {
        self.events.send(Ok(event)).is_ok()
    }

    /// Fail the stream with a read error.
    pub fn fail(&self, message: &str) -> bool {
        self.events
            .send(Err(HttpError::transport("fake-stream", message)))
            .is_ok()
    }

    /// Whether the client dropped its end of the stream
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
