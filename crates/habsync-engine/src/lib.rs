//! # habsync-engine - Page Synchronization
//!
//! Keeps the widget lists of displayed sitemap pages current. Each page is
//! served by its own task that prefers the server's event stream and falls
//! back to long-polling.
//!
//! ## Public API
//!
//! - [`PageConnectionHolder`] - Registry of displayed pages (start/stop, URL
//!   set updates, client rebinding, update triggers)
//! - [`PageConnection`] - Handle to a single page task
//! - [`PageEvent`] - Page, widget and title updates plus failure notices
//! - [`EventSubscriber`] - Event stream retry bookkeeping for one page
//! - [`config`] - `config.toml` loading and [`SyncSettings`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use habsync_client::{fetch_server_properties, HttpClient};
//! use habsync_engine::{PageConnectionHolder, SyncSettings};
//!
//! # async fn run() -> habsync_core::Result<()> {
//! let client = Arc::new(HttpClient::new("http://openhab:8080", None, None)?);
//! let settings = SyncSettings::default();
//! let server = fetch_server_properties(&*client, settings.plain_timeout).await?;
//!
//! let (mut holder, mut events) = PageConnectionHolder::new(server, settings);
//! holder.update_active_connections(&["http://openhab:8080/rest/sitemaps/demo/demo"], Some(client));
//! holder.start();
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.event_type(), event.url());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod event_subscriber;
pub mod page_connection;
pub mod page_event;
pub mod registry;

pub use backoff::{Backoff, MIN_RETRY_DELAY};
pub use config::{load_settings, Settings, SyncSettings};
pub use event_subscriber::{open_page_stream, EventSubscriber, RetryDecision, SubscribeError};
pub use page_connection::{PageConnection, PageContext};
pub use page_event::PageEvent;
pub use registry::PageConnectionHolder;
