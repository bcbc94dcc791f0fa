//! Per-page synchronization task.
//!
//! Each displayed page gets a [`PageConnection`]: a handle to a background
//! task that owns the page's transport state. The task fetches the page with
//! a plain request, then either keeps long-polling or, when the server offers
//! sitemap events, waits for incremental changes on an event stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐  PageCommand   ┌──────────────────────────────────┐
//! │  PageConnection   │ ─────────────▶ │  PageTask (select! loop)          │
//! │  (registry side)  │                │                                    │
//! └───────────────────┘                │  in-flight page request            │
//!                                      │  subscription handshake            │
//!          PageEvent  ◀─────────────── │  event stream                      │
//!                                      │  reload / resubscribe timers       │
//!                                      └──────────────────────────────────┘
//! ```
//!
//! Every suspension point lives in the task's `select!`, so cancelling work
//! is a matter of dropping the corresponding future.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use habsync_client::{Connection, EventStream, HttpError, HttpRequest, HttpResponse, SseEvent};
use habsync_core::{PageSnapshot, ServerProperties, SitemapEvent, Widget};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncSettings;
use crate::event_subscriber::{open_page_stream, EventSubscriber, RetryDecision, SubscribeError};
use crate::page_event::PageEvent;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const TRACKING_ID_HEADER: &str = "X-Atmosphere-tracking-id";
pub const FRAMEWORK_HEADER: &str = "X-Atmosphere-Framework";
pub const TRANSPORT_HEADER: &str = "X-Atmosphere-Transport";

const FRAMEWORK_VERSION: &str = "1.0";
const LONG_POLLING_TRANSPORT: &str = "long-polling";

/// Tracking id sent when the server has not assigned one yet.
const NO_TRACKING_ID: &str = "0";

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Read-only state shared by every page of one registry.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub server: ServerProperties,
    pub settings: SyncSettings,
}

impl PageContext {
    pub fn new(server: ServerProperties, settings: SyncSettings) -> Self {
        Self { server, settings }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum PageCommand<C> {
    Load,
    Cancel,
    TriggerUpdate { force_reload: bool },
    Rebind(Arc<C>),
    Shutdown,
}

/// Handle to one page's background task.
///
/// Dropping the handle ends the task and everything it has in flight.
pub struct PageConnection<C> {
    url: String,
    client: Arc<C>,
    commands: mpsc::UnboundedSender<PageCommand<C>>,
    task: JoinHandle<()>,
}

impl<C> std::fmt::Debug for PageConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageConnection")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl<C> PageConnection<C>
where
    C: Connection + Sync + 'static,
{
    /// Spawn the task for `url`. Nothing is fetched until [`load`](Self::load).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        url: impl Into<String>,
        client: Arc<C>,
        context: Arc<PageContext>,
        events: mpsc::UnboundedSender<PageEvent>,
    ) -> Self {
        let url = url.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = PageTask::new(url.clone(), Arc::clone(&client), context, events);
        let task = tokio::spawn(task.run(command_rx));
        Self {
            url,
            client,
            commands,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_bound_to(&self, client: &Arc<C>) -> bool {
        Arc::ptr_eq(&self.client, client)
    }

    /// Start fetching, unless the page is already kept current by events.
    pub fn load(&self) {
        self.send(PageCommand::Load);
    }

    /// Drop all in-flight work. The cached snapshot is kept.
    pub fn cancel(&self) {
        self.send(PageCommand::Cancel);
    }

    /// Reload from scratch, or re-deliver the cached snapshot.
    pub fn trigger_update(&self, force_reload: bool) {
        self.send(PageCommand::TriggerUpdate { force_reload });
    }

    /// Switch to `client`. Work in flight on the previous client is dropped.
    ///
    /// Returns `false` if the page is already bound to `client`.
    pub fn rebind(&mut self, client: Arc<C>) -> bool {
        if self.is_bound_to(&client) {
            return false;
        }
        self.client = Arc::clone(&client);
        self.send(PageCommand::Rebind(client));
        true
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        self.send(PageCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!("Page task for {} ended abnormally: {}", self.url, e);
        }
    }

    fn send(&self, command: PageCommand<C>) {
        if self.commands.send(command).is_err() {
            debug!("Page task for {} is gone, command dropped", self.url);
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

type RequestFuture = BoxFuture<'static, Result<HttpResponse, HttpError>>;
type SubscribeFuture = BoxFuture<'static, Result<EventStream, SubscribeError>>;
type Timer = Pin<Box<Sleep>>;

enum ParseOutcome {
    Updated(PageSnapshot),
    /// Long-poll expired server side without changes
    Timeout,
    Invalid(habsync_core::Error),
}

struct PageTask<C> {
    url: String,
    client: Arc<C>,
    context: Arc<PageContext>,
    events: mpsc::UnboundedSender<PageEvent>,

    long_polling: bool,
    tracking_id: Option<String>,
    last_title: Option<String>,
    last_widgets: Option<Arc<[Widget]>>,
    /// Consecutive failed page requests
    failure_streak: u32,

    subscriber: Option<EventSubscriber>,

    request: Option<RequestFuture>,
    subscription: Option<SubscribeFuture>,
    stream: Option<EventStream>,
    reload_timer: Option<Timer>,
    resubscribe_timer: Option<Timer>,
}

impl<C> PageTask<C>
where
    C: Connection + Sync + 'static,
{
    fn new(
        url: String,
        client: Arc<C>,
        context: Arc<PageContext>,
        events: mpsc::UnboundedSender<PageEvent>,
    ) -> Self {
        let subscriber = if context.server.has_sse_support() {
            EventSubscriber::for_page(
                &url,
                context.settings.event_max_retries,
                context.settings.event_backoff,
            )
        } else {
            None
        };

        Self {
            url,
            client,
            context,
            events,
            long_polling: false,
            tracking_id: None,
            last_title: None,
            last_widgets: None,
            failure_streak: 0,
            subscriber,
            request: None,
            subscription: None,
            stream: None,
            reload_timer: None,
            resubscribe_timer: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PageCommand<C>>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(PageCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }

                result = poll_slot(&mut self.request) => {
                    self.request = None;
                    self.handle_result(result);
                }

                result = poll_slot(&mut self.subscription) => {
                    self.subscription = None;
                    self.handle_subscription(result);
                }

                item = next_stream_item(&mut self.stream) => {
                    self.handle_stream_item(item);
                }

                () = wait_timer(&mut self.reload_timer) => {
                    self.reload_timer = None;
                    self.load();
                }

                () = wait_timer(&mut self.resubscribe_timer) => {
                    self.resubscribe_timer = None;
                    self.connect_events();
                }
            }
        }
        debug!("Page task for {} exiting", self.url);
    }

    fn handle_command(&mut self, command: PageCommand<C>) {
        match command {
            PageCommand::Load => self.load(),
            PageCommand::Cancel => self.cancel(),
            PageCommand::TriggerUpdate { force_reload } => self.trigger_update(force_reload),
            PageCommand::Rebind(client) => {
                debug!("Rebinding {} to a new client", self.url);
                self.cancel();
                self.client = client;
            }
            PageCommand::Shutdown => {}
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    fn load(&mut self) {
        if self.subscriber.is_some() && self.long_polling {
            trace!("{} is updated via events, not polling", self.url);
            return;
        }
        self.reload_timer = None;

        debug!("Loading data for {}, long polling {}", self.url, self.long_polling);
        let request = match self.build_request() {
            Ok(request) => request,
            Err(error) => {
                warn!("Cannot build request for {}: {}", self.url, error);
                self.emit(PageEvent::LoadFailure {
                    url: self.url.clone(),
                    error,
                });
                return;
            }
        };

        let client = Arc::clone(&self.client);
        self.request = Some(async move { client.get(request).await }.boxed());
        self.connect_events();
    }

    fn build_request(&mut self) -> Result<HttpRequest, HttpError> {
        let mut url = self.client.build_url(&self.url)?;
        url.query_pairs_mut().append_pair("includeHidden", "true");

        let settings = &self.context.settings;
        let timeout = if self.long_polling {
            settings.long_poll_timeout
        } else {
            self.tracking_id = None;
            settings.plain_timeout
        };

        let mut request = HttpRequest::new(url, timeout);
        if !self.context.server.has_json_api() {
            request = request.header("Accept", "application/xml");
        }
        if self.long_polling {
            request = request.header(TRANSPORT_HEADER, LONG_POLLING_TRANSPORT);
        }
        Ok(request
            .header(FRAMEWORK_HEADER, FRAMEWORK_VERSION)
            .header(
                TRACKING_ID_HEADER,
                self.tracking_id.as_deref().unwrap_or(NO_TRACKING_ID),
            ))
    }

    fn cancel(&mut self) {
        debug!("Canceling connection for {}", self.url);
        self.request = None;
        self.reload_timer = None;
        self.subscription = None;
        self.stream = None;
        self.resubscribe_timer = None;
        self.long_polling = false;
        self.failure_streak = 0;
    }

    /// Drop everything, including the cache, and start over with a plain request.
    fn reload(&mut self) {
        self.cancel();
        self.last_title = None;
        self.last_widgets = None;
        self.load();
    }

    fn trigger_update(&mut self, force_reload: bool) {
        debug!("Trigger update for {}, force {}", self.url, force_reload);
        if force_reload {
            self.reload();
        } else if let Some(widgets) = &self.last_widgets {
            self.emit(PageEvent::PageUpdated {
                url: self.url.clone(),
                title: self.last_title.clone().unwrap_or_default(),
                widgets: Arc::clone(widgets),
            });
        }
    }

    // ── Page responses ──────────────────────────────────────────────────

    fn handle_result(&mut self, result: Result<HttpResponse, HttpError>) {
        match result {
            Ok(response) => {
                self.failure_streak = 0;
                self.handle_response(response);
            }
            Err(error) => self.handle_load_failure(error),
        }
    }

    fn handle_load_failure(&mut self, error: HttpError) {
        debug!("Data load for {} failed: {}", self.url, error);
        self.tracking_id = None;
        self.long_polling = false;
        self.failure_streak = self.failure_streak.saturating_add(1);

        if self.failure_streak == 1 {
            warn!("Loading {} failed: {}", self.url, error);
            self.emit(PageEvent::LoadFailure {
                url: self.url.clone(),
                error,
            });
        }

        let delay = self
            .context
            .settings
            .failure_backoff
            .delay(self.failure_streak);
        debug!("Retrying {} in {:?} (failure {})", self.url, delay, self.failure_streak);
        self.reload_timer = Some(Box::pin(sleep(delay)));
    }

    fn handle_response(&mut self, response: HttpResponse) {
        if let Some(id) = response.header(TRACKING_ID_HEADER) {
            self.tracking_id = Some(id.to_string());
        }

        // Empty body: nothing changed
        if response.body.is_empty() {
            debug!("Got empty data response for {}", self.url);
            self.long_polling = true;
            self.load();
            return;
        }

        match self.parse_page(&response.body) {
            ParseOutcome::Updated(snapshot) => {
                self.long_polling = true;
                self.publish_snapshot(snapshot);
                self.load();
            }
            ParseOutcome::Timeout => {
                debug!("Long polling timeout for {}", self.url);
                self.load();
            }
            ParseOutcome::Invalid(e) => {
                warn!("Parsing data for {} failed: {}", self.url, e);
                self.long_polling = false;
                self.schedule_reload(self.context.settings.parse_error_retry);
            }
        }
    }

    fn parse_page(&self, body: &str) -> ParseOutcome {
        let server = &self.context.server;
        if !server.has_json_api() {
            return match PageSnapshot::from_xml(body) {
                Ok(snapshot) => ParseOutcome::Updated(snapshot),
                Err(e) => ParseOutcome::Invalid(e),
            };
        }

        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => return ParseOutcome::Invalid(e.into()),
        };
        let timed_out = value
            .get("timeout")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if self.long_polling && timed_out {
            return ParseOutcome::Timeout;
        }
        match PageSnapshot::from_json(&value, server.icon_format()) {
            Ok(snapshot) => ParseOutcome::Updated(snapshot),
            Err(e) => ParseOutcome::Invalid(e),
        }
    }

    fn publish_snapshot(&mut self, snapshot: PageSnapshot) {
        let widgets: Arc<[Widget]> = snapshot.widgets().into();
        debug!("Updated page data for {} ({} widgets)", self.url, widgets.len());
        if self.context.settings.detailed_logging {
            for (index, widget) in widgets.iter().enumerate() {
                debug!("Widget {}: {:?}", index + 1, widget);
            }
        }

        self.last_title = Some(snapshot.title.clone());
        self.last_widgets = Some(Arc::clone(&widgets));
        self.emit(PageEvent::PageUpdated {
            url: self.url.clone(),
            title: snapshot.title,
            widgets,
        });
    }

    fn schedule_reload(&mut self, delay: Duration) {
        self.reload_timer = Some(Box::pin(sleep(delay)));
    }

    // ── Event stream ────────────────────────────────────────────────────

    /// (Re)start the subscription, dropping any open stream.
    fn connect_events(&mut self) {
        let Some(subscriber) = &self.subscriber else {
            return;
        };
        self.stream = None;
        self.resubscribe_timer = None;

        let client = Arc::clone(&self.client);
        let sitemap = subscriber.sitemap().to_string();
        let page_id = subscriber.page_id().to_string();
        self.subscription =
            Some(async move { open_page_stream(&*client, &sitemap, &page_id).await }.boxed());
    }

    fn handle_subscription(&mut self, result: Result<EventStream, SubscribeError>) {
        match result {
            Ok(stream) => {
                info!("Event stream opened for {}", self.url);
                if let Some(subscriber) = self.subscriber.as_mut() {
                    subscriber.on_stream_opened();
                }
                self.stream = Some(stream);
            }
            Err(SubscribeError::Unsupported { reason }) => {
                debug!("Event stream unsupported for {} ({}), using long polling", self.url, reason);
                self.drop_subscriber();
            }
            Err(SubscribeError::Http(error)) => {
                warn!("Failed subscribing for events on {}: {}", self.url, error);
                self.retry_events(error.retry_after);
            }
        }
    }

    fn handle_stream_item(&mut self, item: Option<Result<SseEvent, HttpError>>) {
        match item {
            Some(Ok(event)) => {
                if let (Some(retry), Some(subscriber)) = (event.retry, self.subscriber.as_mut()) {
                    subscriber.set_server_retry(retry);
                }
                if event.has_data() {
                    self.handle_update_event(&event.data);
                }
            }
            Some(Err(error)) => {
                warn!("Event stream for {} failed: {}", self.url, error);
                self.stream = None;
                self.retry_events(error.retry_after);
            }
            None => {
                warn!("Event stream for {} closed by server", self.url);
                self.stream = None;
                self.retry_events(None);
            }
        }
    }

    fn retry_events(&mut self, retry_after: Option<Duration>) {
        let Some(subscriber) = self.subscriber.as_mut() else {
            return;
        };
        match subscriber.on_failure(retry_after) {
            RetryDecision::Retry(delay) => {
                warn!(
                    "Event stream for {}: retrying in {:?} (attempt {}/{})",
                    self.url,
                    delay,
                    subscriber.attempts(),
                    subscriber.max_retries()
                );
                self.resubscribe_timer = Some(Box::pin(sleep(delay)));
            }
            RetryDecision::GiveUp => {
                error!(
                    "Event stream for {}: exceeded {} attempts, falling back to long polling",
                    self.url,
                    subscriber.max_retries()
                );
                self.emit(PageEvent::StreamFailure {
                    url: self.url.clone(),
                });
                self.drop_subscriber();
            }
        }
    }

    /// Continue without events for the rest of this task's life.
    fn drop_subscriber(&mut self) {
        self.subscriber = None;
        self.subscription = None;
        self.stream = None;
        self.resubscribe_timer = None;
        if self.long_polling {
            self.load();
        }
    }

    fn handle_update_event(&mut self, data: &str) {
        let event = match SitemapEvent::parse(data) {
            Ok(event) => event,
            Err(e) => {
                warn!("Could not parse event for {} ('{}'): {}", self.url, data, e);
                return;
            }
        };

        match event {
            SitemapEvent::SitemapChanged { sitemap, page_id } => {
                let own = self
                    .subscriber
                    .as_ref()
                    .map_or(true, |s| s.is_own_change(sitemap.as_deref(), page_id.as_deref()));
                if !own && !self.context.settings.reload_on_foreign_sitemap_change {
                    debug!("Ignoring SITEMAP_CHANGED for {:?}/{:?}", sitemap, page_id);
                    return;
                }
                debug!(
                    "Got SITEMAP_CHANGED for {:?}/{:?}, reloading {}",
                    sitemap, page_id, self.url
                );
                self.reload();
            }
            SitemapEvent::Alive => trace!("Got ALIVE event for {}", self.url),
            SitemapEvent::WidgetChanged { widget_id, payload } => {
                let is_page = self
                    .subscriber
                    .as_ref()
                    .is_some_and(|s| s.page_id() == widget_id);
                if is_page {
                    match payload.label {
                        Some(title) => {
                            self.last_title = Some(title.clone());
                            self.emit(PageEvent::TitleUpdated {
                                url: self.url.clone(),
                                title,
                            });
                        }
                        None => warn!("Page event for {} without label", self.url),
                    }
                    return;
                }

                if let Some(widgets) = self.last_widgets.clone() {
                    if let Some(index) = widgets.iter().position(|w| w.id == widget_id) {
                        let cached = &widgets[index];
                        // Older servers send the trigger item's data on visibility
                        // changes, which must not be applied to this widget
                        let trusted = self.context.server.has_invisible_widget_support()
                            || payload.reported_visibility() == cached.visibility;
                        if trusted {
                            let updated =
                                cached.update_from_event(payload, self.context.server.icon_format());
                            let mut next = widgets.to_vec();
                            next[index] = updated.clone();
                            self.last_widgets = Some(next.into());
                            self.emit(PageEvent::WidgetUpdated {
                                url: self.url.clone(),
                                widget: updated,
                            });
                            return;
                        }
                    }
                }

                // The pending full fetch already carries this change
                let fetch_pending = self.request.is_some() || self.reload_timer.is_some();
                if self.last_widgets.is_none() && fetch_pending {
                    debug!(
                        "Dropping event for widget {}, page {} is still loading",
                        widget_id, self.url
                    );
                    return;
                }

                debug!("Cannot apply event for widget {}, reloading {}", widget_id, self.url);
                self.reload();
            }
        }
    }

    fn emit(&self, event: PageEvent) {
        if self.events.send(event).is_err() {
            trace!("Page event receiver dropped, event for {} discarded", self.url);
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Await the future in `slot`, or never complete when empty.
///
/// The caller must clear the slot once this completes.
async fn poll_slot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_stream_item(stream: &mut Option<EventStream>) -> Option<Result<SseEvent, HttpError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Timer>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use habsync_client::test_utils::{FakeConnection, FakeServer, PendingGet};
    use habsync_core::ServerFlags;
    use tokio::time::Instant;

    const PAGE_URL: &str = "http://demo:8080/rest/sitemaps/demo/0001";

    const PAGE_JSON: &str = r#"{
        "id": "0001",
        "title": "Ground Floor",
        "widgets": [
            {"widgetId": "W1", "type": "Text", "label": "Temperature [21.5 °C]", "visibility": true},
            {"widgetId": "W5", "type": "Switch", "label": "Light", "visibility": true}
        ]
    }"#;

    const SUBSCRIBED: &str = r#"{"status":"CREATED","context":{"headers":{"Location":["http://demo:8080/rest/sitemaps/events/f00"]}}}"#;

    struct Harness {
        page: PageConnection<FakeConnection>,
        server: FakeServer,
        events: mpsc::UnboundedReceiver<PageEvent>,
    }

    fn harness(flags: ServerFlags, settings: SyncSettings) -> Harness {
        let (connection, server) = FakeConnection::new("http://demo:8080/");
        let (events_tx, events) = mpsc::unbounded_channel();
        let context = Arc::new(PageContext::new(
            ServerProperties::new(flags, Vec::new()),
            settings,
        ));
        let page = PageConnection::spawn(PAGE_URL, Arc::new(connection), context, events_tx);
        Harness {
            page,
            server,
            events,
        }
    }

    fn polling_harness() -> Harness {
        harness(ServerFlags::JSON_REST_API, SyncSettings::default())
    }

    fn event_harness() -> Harness {
        harness(
            ServerFlags::JSON_REST_API | ServerFlags::SSE_SUPPORT,
            SyncSettings::default(),
        )
    }

    fn is_long_poll(get: &PendingGet) -> bool {
        get.request.header_value(TRANSPORT_HEADER) == Some(LONG_POLLING_TRANSPORT)
    }

    fn tracking_id(get: &PendingGet) -> Option<&str> {
        get.request.header_value(TRACKING_ID_HEADER)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PageEvent>) -> PageEvent {
        events.recv().await.expect("event channel closed")
    }

    /// Bring an event-driven page to the point where its stream is open and
    /// the first snapshot is delivered.
    async fn open_event_page(
        h: &mut Harness,
    ) -> habsync_client::test_utils::StreamHandle {
        h.page.load();
        let get = h.server.next_get().await.unwrap();
        let post = h.server.next_post().await.unwrap();
        post.respond(SUBSCRIBED);
        let stream = h.server.next_stream().await.unwrap().accept();
        get.respond(PAGE_JSON);
        assert!(matches!(next_event(&mut h.events).await, PageEvent::PageUpdated { .. }));
        stream
    }

    #[tokio::test]
    async fn test_plain_request_then_long_poll() {
        let mut h = polling_harness();
        h.page.load();

        let get = h.server.next_get().await.unwrap();
        assert_eq!(
            get.request.url.as_str(),
            "http://demo:8080/rest/sitemaps/demo/0001?includeHidden=true"
        );
        assert!(!is_long_poll(&get));
        assert_eq!(tracking_id(&get), Some("0"));
        assert_eq!(get.request.header_value(FRAMEWORK_HEADER), Some("1.0"));
        assert_eq!(get.request.header_value("Accept"), None);
        assert_eq!(get.request.timeout, Duration::from_secs(10));
        get.respond_with_headers(PAGE_JSON, &[(TRACKING_ID_HEADER, "abc123")]);

        match next_event(&mut h.events).await {
            PageEvent::PageUpdated { url, title, widgets } => {
                assert_eq!(url, PAGE_URL);
                assert_eq!(title, "Ground Floor");
                assert_eq!(widgets.len(), 2);
                assert_eq!(widgets[0].label, "Temperature");
                assert_eq!(widgets[0].state_label.as_deref(), Some("21.5 °C"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let poll = h.server.next_get().await.unwrap();
        assert!(is_long_poll(&poll));
        assert_eq!(tracking_id(&poll), Some("abc123"));
        assert_eq!(poll.request.timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_legacy_server_requests_xml() {
        let mut h = harness(ServerFlags::empty(), SyncSettings::default());
        h.page.load();

        let get = h.server.next_get().await.unwrap();
        assert_eq!(get.request.header_value("Accept"), Some("application/xml"));
        get.respond(
            "<page><id>0001</id><title>Ground Floor</title>\
             <widget><widgetId>W1</widgetId><type>Text</type><label>Hello</label></widget></page>",
        );

        match next_event(&mut h.events).await {
            PageEvent::PageUpdated { title, widgets, .. } => {
                assert_eq!(title, "Ground Floor");
                assert_eq!(widgets[0].id, "W1");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(is_long_poll(&h.server.next_get().await.unwrap()));
    }

    #[tokio::test]
    async fn test_empty_body_reissues_long_poll_without_update() {
        let mut h = polling_harness();
        h.page.load();

        h.server.next_get().await.unwrap().respond("");
        let poll = h.server.next_get().await.unwrap();
        assert!(is_long_poll(&poll));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_long_poll_timeout_repolls() {
        let mut h = polling_harness();
        h.page.load();
        h.server.next_get().await.unwrap().respond(PAGE_JSON);
        next_event(&mut h.events).await;

        h.server.next_get().await.unwrap().respond(r#"{"timeout": true}"#);
        let poll = h.server.next_get().await.unwrap();
        assert!(is_long_poll(&poll));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_resets_tracking_id_and_reports_once() {
        let mut h = polling_harness();
        h.page.load();
        h.server
            .next_get()
            .await
            .unwrap()
            .respond_with_headers(PAGE_JSON, &[(TRACKING_ID_HEADER, "abc123")]);
        next_event(&mut h.events).await;

        let poll = h.server.next_get().await.unwrap();
        assert_eq!(tracking_id(&poll), Some("abc123"));
        poll.fail(503);

        match next_event(&mut h.events).await {
            PageEvent::LoadFailure { url, error } => {
                assert_eq!(url, PAGE_URL);
                assert_eq!(error.status_code, 503);
                assert!(error.url.ends_with("includeHidden=true"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let started = Instant::now();
        let retry = h.server.next_get().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(!is_long_poll(&retry));
        assert_eq!(tracking_id(&retry), Some("0"));
        retry.fail(503);

        let started = Instant::now();
        let retry = h.server.next_get().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(h.events.try_recv().is_err(), "failure reported once per streak");
        retry.respond(PAGE_JSON);
        assert!(matches!(next_event(&mut h.events).await, PageEvent::PageUpdated { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_delays_plain_retry() {
        let mut h = polling_harness();
        h.page.load();

        h.server.next_get().await.unwrap().respond("this is not json");
        let started = Instant::now();
        let retry = h.server.next_get().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(!is_long_poll(&retry));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_update_redelivers_cache() {
        let mut h = polling_harness();
        h.page.trigger_update(false);
        h.page.load();
        let get = h.server.next_get().await.unwrap();
        assert!(h.events.try_recv().is_err());

        get.respond(PAGE_JSON);
        next_event(&mut h.events).await;
        let _poll = h.server.next_get().await.unwrap();

        h.page.trigger_update(false);
        match next_event(&mut h.events).await {
            PageEvent::PageUpdated { title, widgets, .. } => {
                assert_eq!(title, "Ground Floor");
                assert_eq!(widgets.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.server.try_next_get().is_none());
    }

    #[tokio::test]
    async fn test_forced_update_restarts_with_plain_request() {
        let mut h = polling_harness();
        h.page.load();
        h.server.next_get().await.unwrap().respond(PAGE_JSON);
        next_event(&mut h.events).await;
        let poll = h.server.next_get().await.unwrap();

        h.page.trigger_update(true);
        let fresh = h.server.next_get().await.unwrap();
        assert!(!is_long_poll(&fresh));
        assert_eq!(tracking_id(&fresh), Some("0"));
        assert!(poll.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_drops_in_flight_request() {
        let mut h = polling_harness();
        h.page.load();
        let get = h.server.next_get().await.unwrap();

        h.page.cancel();
        h.page.shutdown().await;
        assert!(get.is_cancelled());
    }

    #[tokio::test]
    async fn test_rebind_uses_new_client() {
        let mut h = polling_harness();
        h.page.load();
        let old = h.server.next_get().await.unwrap();

        let (connection, mut new_server) = FakeConnection::new("http://demo:8080/");
        let client = Arc::new(connection);
        assert!(h.page.rebind(Arc::clone(&client)));
        assert!(!h.page.rebind(client));
        h.page.load();

        let fresh = new_server.next_get().await.unwrap();
        assert!(!is_long_poll(&fresh));
        assert!(old.is_cancelled());
        assert!(h.server.try_next_get().is_none());
    }

    #[tokio::test]
    async fn test_event_driven_page_stops_polling() {
        let mut h = event_harness();
        let _stream = open_event_page(&mut h).await;
        assert!(h.server.try_next_get().is_none());
    }

    #[tokio::test]
    async fn test_widget_event_updates_cached_widget() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"widgetId":"W5","label":"Ceiling Light [ON]","visibility":true}"#);
        match next_event(&mut h.events).await {
            PageEvent::WidgetUpdated { url, widget } => {
                assert_eq!(url, PAGE_URL);
                assert_eq!(widget.id, "W5");
                assert_eq!(widget.label, "Ceiling Light");
                assert_eq!(widget.state_label.as_deref(), Some("ON"));
            }
            other => panic!("unexpected {:?}", other),
        }

        h.page.trigger_update(false);
        match next_event(&mut h.events).await {
            PageEvent::PageUpdated { widgets, .. } => {
                assert_eq!(widgets.len(), 2);
                assert_eq!(widgets[0].id, "W1");
                assert_eq!(widgets[0].label, "Temperature");
                assert_eq!(widgets[0].state_label.as_deref(), Some("21.5 °C"));
                assert!(widgets[0].visibility);
                assert_eq!(widgets[1].label, "Ceiling Light");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_widget_event_before_first_snapshot_keeps_initial_request() {
        let mut h = event_harness();
        h.page.load();
        let get = h.server.next_get().await.unwrap();
        let post = h.server.next_post().await.unwrap();
        post.respond(SUBSCRIBED);
        let stream = h.server.next_stream().await.unwrap().accept();

        stream.send_data(r#"{"widgetId":"W5","label":"Light [ON]","visibility":true}"#);
        stream.send_data(r#"{"widgetId":"W99","visibility":true}"#);
        // Stream events are handled in order, so the title marks both as done
        stream.send_data(r#"{"widgetId":"0001","label":"Ground Floor"}"#);
        assert!(matches!(
            next_event(&mut h.events).await,
            PageEvent::TitleUpdated { .. }
        ));

        assert!(!get.is_cancelled());
        assert!(h.server.try_next_get().is_none());
        assert!(!stream.is_closed());

        get.respond(PAGE_JSON);
        match next_event(&mut h.events).await {
            PageEvent::PageUpdated { widgets, .. } => assert_eq!(widgets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_page_event_updates_title() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"widgetId":"0001","label":"Upstairs"}"#);
        match next_event(&mut h.events).await {
            PageEvent::TitleUpdated { title, .. } => assert_eq!(title, "Upstairs"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_widget_event_reloads_page() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"widgetId":"W99","visibility":true}"#);
        let get = h.server.next_get().await.unwrap();
        assert!(!is_long_poll(&get));
        assert_eq!(tracking_id(&get), Some("0"));
        assert!(h.server.next_post().await.is_some());
        get.respond(PAGE_JSON);
        assert!(matches!(next_event(&mut h.events).await, PageEvent::PageUpdated { .. }));
    }

    #[tokio::test]
    async fn test_untrusted_visibility_change_reloads_page() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"widgetId":"W5","label":"Light","visibility":false}"#);
        let get = h.server.next_get().await.unwrap();
        assert!(!is_long_poll(&get));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_visibility_change_applied_with_invisible_widget_support() {
        let mut h = harness(
            ServerFlags::JSON_REST_API | ServerFlags::SSE_SUPPORT | ServerFlags::INVISIBLE_WIDGETS,
            SyncSettings::default(),
        );
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"widgetId":"W5","visibility":false}"#);
        match next_event(&mut h.events).await {
            PageEvent::WidgetUpdated { widget, .. } => assert!(!widget.visibility),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sitemap_changed_triggers_one_plain_request() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"TYPE":"SITEMAP_CHANGED","sitemapName":"demo","pageId":"0001"}"#);
        let get = h.server.next_get().await.unwrap();
        assert!(!is_long_poll(&get));
        assert!(h.server.try_next_get().is_none());
        assert!(stream.is_closed());
        assert!(h.server.next_post().await.is_some());
    }

    #[tokio::test]
    async fn test_foreign_sitemap_change_ignored_when_configured() {
        let settings = SyncSettings {
            reload_on_foreign_sitemap_change: false,
            ..SyncSettings::default()
        };
        let mut h = harness(ServerFlags::JSON_REST_API | ServerFlags::SSE_SUPPORT, settings);
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"TYPE":"SITEMAP_CHANGED","sitemapName":"other"}"#);
        stream.send_data(r#"{"widgetId":"W5","label":"Still here","visibility":true}"#);
        assert!(matches!(
            next_event(&mut h.events).await,
            PageEvent::WidgetUpdated { .. }
        ));
        assert!(h.server.try_next_get().is_none());
    }

    #[tokio::test]
    async fn test_alive_and_garbage_events_are_ignored() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send_data(r#"{"TYPE":"ALIVE"}"#);
        stream.send_data("{not json");
        stream.send_data(r#"{"widgetId":"W1","label":"Outside [3 °C]","visibility":true}"#);
        match next_event(&mut h.events).await {
            PageEvent::WidgetUpdated { widget, .. } => assert_eq!(widget.id, "W1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.server.try_next_get().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_not_found_falls_back_to_long_polling() {
        let mut h = event_harness();
        h.page.load();
        let get = h.server.next_get().await.unwrap();
        h.server.next_post().await.unwrap().fail(404);
        get.respond(PAGE_JSON);
        next_event(&mut h.events).await;

        let poll = h.server.next_get().await.unwrap();
        assert!(is_long_poll(&poll));
        assert!(h.events.try_recv().is_err(), "no stream failure notice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_failure_after_bounded_retries() {
        let settings = SyncSettings {
            event_max_retries: 2,
            ..SyncSettings::default()
        };
        let mut h = harness(ServerFlags::JSON_REST_API | ServerFlags::SSE_SUPPORT, settings);
        h.page.load();
        h.server.next_get().await.unwrap().respond(PAGE_JSON);
        assert!(matches!(next_event(&mut h.events).await, PageEvent::PageUpdated { .. }));

        for _ in 0..3 {
            h.server.next_post().await.unwrap().fail(503);
        }

        match next_event(&mut h.events).await {
            PageEvent::StreamFailure { url } => assert_eq!(url, PAGE_URL),
            other => panic!("unexpected {:?}", other),
        }
        let poll = h.server.next_get().await.unwrap();
        assert!(is_long_poll(&poll));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closure_resubscribes_with_server_hint() {
        let mut h = event_harness();
        let stream = open_event_page(&mut h).await;

        stream.send(SseEvent {
            retry: Some(Duration::from_secs(5)),
            ..SseEvent::default()
        });
        drop(stream);

        let started = Instant::now();
        let post = h.server.next_post().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        post.respond(SUBSCRIBED);
        let pending = h.server.next_stream().await.unwrap();
        assert!(pending.url.as_str().ends_with("?sitemap=demo&pageid=0001"));
        assert!(h.events.try_recv().is_err());
    }
}
