//! Events the page connections emit for the UI layer

use std::sync::Arc;

use habsync_client::HttpError;
use habsync_core::Widget;

/// Upward notification from one page connection.
///
/// Every variant carries the page URL it belongs to, so a single receiver
/// can serve any number of pages.
#[derive(Debug, Clone)]
pub enum PageEvent {
    // ─────────────────────────────────────────────────────────
    // Page Content
    // ─────────────────────────────────────────────────────────
    /// A full page payload was received (or the cached one re-delivered)
    PageUpdated {
        url: String,
        title: String,
        widgets: Arc<[Widget]>,
    },

    /// One widget changed in place
    WidgetUpdated { url: String, widget: Widget },

    /// The page title changed
    TitleUpdated { url: String, title: String },

    // ─────────────────────────────────────────────────────────
    // Failures
    // ─────────────────────────────────────────────────────────
    /// A page request failed; reported once per failure streak
    LoadFailure { url: String, error: HttpError },

    /// The event stream gave up; the page keeps working by long-polling
    StreamFailure { url: String },
}

impl PageEvent {
    pub fn url(&self) -> &str {
        match self {
            PageEvent::PageUpdated { url, .. }
            | PageEvent::WidgetUpdated { url, .. }
            | PageEvent::TitleUpdated { url, .. }
            | PageEvent::LoadFailure { url, .. }
            | PageEvent::StreamFailure { url } => url,
        }
    }

    /// Get a string label for the event type (useful for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            PageEvent::PageUpdated { .. } => "page_updated",
            PageEvent::WidgetUpdated { .. } => "widget_updated",
            PageEvent::TitleUpdated { .. } => "title_updated",
            PageEvent::LoadFailure { .. } => "load_failure",
            PageEvent::StreamFailure { .. } => "stream_failure",
        }
    }
}
