//! Manages the page connections of all currently displayed pages

use std::collections::HashMap;
use std::sync::Arc;

use habsync_client::Connection;
use habsync_core::ServerProperties;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SyncSettings;
use crate::page_connection::{PageConnection, PageContext};
use crate::page_event::PageEvent;

/// Owns one [`PageConnection`] per displayed page URL.
///
/// All page events arrive on the receiver returned by [`new`](Self::new).
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct PageConnectionHolder<C> {
    /// Page handles indexed by page URL
    connections: HashMap<String, PageConnection<C>>,

    context: Arc<PageContext>,

    events: mpsc::UnboundedSender<PageEvent>,

    /// Whether pages should be loading
    started: bool,
}

impl<C> PageConnectionHolder<C>
where
    C: Connection + Sync + 'static,
{
    /// Create an empty, stopped registry and the receiver for its events
    pub fn new(
        server: ServerProperties,
        settings: SyncSettings,
    ) -> (Self, mpsc::UnboundedReceiver<PageEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let holder = Self {
            connections: HashMap::new(),
            context: Arc::new(PageContext::new(server, settings)),
            events,
            started: false,
        };
        (holder, receiver)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.connections.contains_key(url)
    }

    /// Replace the set of tracked pages.
    ///
    /// Without a client every page is dropped. Otherwise pages no longer
    /// listed are dropped, new ones are created (and loaded if started), and
    /// pages bound to a different client are rebound (and reloaded if
    /// started).
    pub fn update_active_connections<S: AsRef<str>>(&mut self, urls: &[S], client: Option<Arc<C>>) {
        let Some(client) = client else {
            debug!("No client, dropping {} page connection(s)", self.connections.len());
            self.connections.clear();
            return;
        };

        self.connections
            .retain(|url, _| urls.iter().any(|u| u.as_ref() == url.as_str()));

        for url in urls.iter().map(AsRef::as_ref) {
            match self.connections.get_mut(url) {
                Some(page) => {
                    if page.rebind(Arc::clone(&client)) && self.started {
                        page.load();
                    }
                }
                None => {
                    debug!("Creating new page connection for {}", url);
                    let page = PageConnection::spawn(
                        url,
                        Arc::clone(&client),
                        Arc::clone(&self.context),
                        self.events.clone(),
                    );
                    if self.started {
                        page.load();
                    }
                    self.connections.insert(url.to_string(), page);
                }
            }
        }
    }

    /// Start loading every page. No-op when already started.
    pub fn start(&mut self) {
        debug!("start(), started {}", self.started);
        if self.started {
            return;
        }
        for page in self.connections.values() {
            page.load();
        }
        self.started = true;
    }

    /// Stop every page, unless the stop is transient (the pages are about
    /// to be shown again, so in-flight work is kept).
    pub fn stop(&mut self, transient: bool) {
        debug!("stop(), transient {}", transient);
        if transient {
            return;
        }
        for page in self.connections.values() {
            page.cancel();
        }
        self.started = false;
    }

    /// Ask for data of `url` to be delivered: a full reload when
    /// `force_reload`, otherwise the cached snapshot if there is one.
    pub fn trigger_update(&self, url: &str, force_reload: bool) {
        match self.connections.get(url) {
            Some(page) => page.trigger_update(force_reload),
            None => debug!("trigger_update for unknown page {}", url),
        }
    }

    /// Stop every page task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.started = false;
        for (_, page) in self.connections.drain() {
            page.shutdown().await;
        }
    }
}
