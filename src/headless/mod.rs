//! Headless mode - NDJSON page events on stdout
//!
//! Every page event of the registry is printed as one JSON object per line,
//! which keeps the output easy to consume from scripts and test harnesses.
//!
//! # Example Output
//!
//! ```json
//! {"event":"connected","base_url":"http://openhab:8080/","json_api":true,"sse":true,"timestamp":1704700001000}
//! {"event":"page_updated","url":"http://openhab:8080/rest/sitemaps/demo/demo","title":"Home","widgets":[...],"timestamp":1704700002000}
//! {"event":"widget_updated","url":"http://openhab:8080/rest/sitemaps/demo/demo","widget":{"id":"0001","type":"Switch","label":"Light","state":"ON"},"timestamp":1704700003000}
//! ```

pub mod runner;

use chrono::Utc;
use habsync_core::{LabeledValue, ServerProperties, Sitemap, Widget};
use habsync_engine::PageEvent;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

/// Compact view of a widget for the event output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub widget_type: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_label: Option<String>,
    /// Choices offered by selection-style widgets
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSummary {
    pub value: String,
    pub label: String,
}

impl From<&LabeledValue> for OptionSummary {
    fn from(option: &LabeledValue) -> Self {
        Self {
            value: option.value.clone(),
            label: option.label.clone(),
        }
    }
}

impl From<&Widget> for WidgetSummary {
    fn from(widget: &Widget) -> Self {
        Self {
            id: widget.id.clone(),
            widget_type: widget.widget_type.as_str().to_string(),
            label: widget.label.clone(),
            state: widget.state.as_ref().map(ToString::to_string),
            state_label: widget.state_label.clone(),
            options: widget
                .mappings_or_item_options()
                .iter()
                .map(OptionSummary::from)
                .collect(),
        }
    }
}

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Server capabilities were probed
    Connected {
        base_url: String,
        json_api: bool,
        sse: bool,
        timestamp: i64,
    },

    /// A sitemap offered by the server
    SitemapListed {
        name: String,
        label: String,
        homepage: String,
        timestamp: i64,
    },

    /// A full page snapshot was loaded
    PageUpdated {
        url: String,
        title: String,
        widgets: Vec<WidgetSummary>,
        timestamp: i64,
    },

    /// A single widget changed through the event stream
    WidgetUpdated {
        url: String,
        widget: WidgetSummary,
        timestamp: i64,
    },

    TitleUpdated {
        url: String,
        title: String,
        timestamp: i64,
    },

    /// First failure of a series of page loads
    LoadFailure {
        url: String,
        status: u16,
        message: String,
        timestamp: i64,
    },

    /// Event stream retries exhausted, the page falls back to long-polling
    StreamFailure { url: String, timestamp: i64 },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        // Consumers read line by line
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn connected(base_url: &str, server: &ServerProperties) -> Self {
        Self::Connected {
            base_url: base_url.to_string(),
            json_api: server.has_json_api(),
            sse: server.has_sse_support(),
            timestamp: Self::now(),
        }
    }

    pub fn sitemap_listed(sitemap: &Sitemap) -> Self {
        Self::SitemapListed {
            name: sitemap.name.clone(),
            label: sitemap.label.clone(),
            homepage: sitemap.homepage_link.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}

impl From<&PageEvent> for HeadlessEvent {
    fn from(event: &PageEvent) -> Self {
        let timestamp = Self::now();
        match event {
            PageEvent::PageUpdated {
                url,
                title,
                widgets,
            } => Self::PageUpdated {
                url: url.clone(),
                title: title.clone(),
                widgets: widgets.iter().map(WidgetSummary::from).collect(),
                timestamp,
            },
            PageEvent::WidgetUpdated { url, widget } => Self::WidgetUpdated {
                url: url.clone(),
                widget: WidgetSummary::from(widget),
                timestamp,
            },
            PageEvent::TitleUpdated { url, title } => Self::TitleUpdated {
                url: url.clone(),
                title: title.clone(),
                timestamp,
            },
            PageEvent::LoadFailure { url, error } => Self::LoadFailure {
                url: url.clone(),
                status: error.status_code,
                message: error.message.clone(),
                timestamp,
            },
            PageEvent::StreamFailure { url } => Self::StreamFailure {
                url: url.clone(),
                timestamp,
            },
        }
    }
}
