//! # habsync-client - Server Transport
//!
//! HTTP and server-sent event transport used by the sync engine.
//!
//! ## Public API
//!
//! - [`Connection`] - Async transport trait the engine is generic over
//! - [`HttpClient`] - reqwest-backed implementation with basic auth
//! - [`HttpError`] - Failed exchange with URL, status code and retry hint
//! - [`EventStream`], [`SseEvent`], [`SseDecoder`] - EventSource decoding
//! - [`fetch_server_properties`], [`fetch_sitemaps`] - Capability probing
//!
//! ## Testing
//!
//! Enable the `test-helpers` feature for [`test_utils::FakeConnection`], a
//! scripted in-memory [`Connection`].

pub mod connection;
pub mod error;
pub mod http;
pub mod server;
pub mod sse;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use connection::{
    normalize_base_url, resolve_url, Connection, HttpRequest, HttpResponse, LocalConnection,
};
pub use error::{HttpError, TRANSPORT_FAILURE_STATUS};
pub use http::{Credentials, HttpClient, DEFAULT_USER_AGENT};
pub use server::{fetch_server_properties, fetch_sitemaps};
pub use sse::{decode_event_stream, EventStream, SseDecoder, SseEvent};
