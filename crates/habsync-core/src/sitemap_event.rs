//! Incremental events delivered on a page's event stream

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::widget::WidgetEventPayload;

/// One decoded event-stream message
#[derive(Debug, Clone)]
pub enum SitemapEvent {
    /// The sitemap definition changed on the server; pages must be refetched
    SitemapChanged {
        sitemap: Option<String>,
        page_id: Option<String>,
    },
    /// Heartbeat
    Alive,
    /// A widget (or, when `widget_id` is the page id, the page itself) changed
    WidgetChanged {
        widget_id: String,
        payload: WidgetEventPayload,
    },
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "TYPE", default)]
    event_type: Option<String>,
    #[serde(rename = "sitemapName", default)]
    sitemap_name: Option<String>,
    #[serde(rename = "pageId", default)]
    page_id: Option<String>,
    #[serde(rename = "widgetId", default)]
    widget_id: Option<String>,
    #[serde(flatten)]
    widget: WidgetEventPayload,
}

impl SitemapEvent {
    /// Decode the `data` field of a stream event.
    pub fn parse(data: &str) -> Result<SitemapEvent> {
        let envelope: EventEnvelope = serde_json::from_str(data)?;
        match envelope.event_type.as_deref() {
            Some("SITEMAP_CHANGED") => {
                return Ok(SitemapEvent::SitemapChanged {
                    sitemap: envelope.sitemap_name,
                    page_id: envelope.page_id,
                })
            }
            Some("ALIVE") => return Ok(SitemapEvent::Alive),
            _ => {}
        }

        let widget_id = envelope
            .widget_id
            .ok_or_else(|| Error::payload("event without widgetId"))?;
        Ok(SitemapEvent::WidgetChanged {
            widget_id,
            payload: envelope.widget,
        })
    }
}

impl WidgetEventPayload {
    /// Visibility the event reports, visible unless stated otherwise
    pub fn reported_visibility(&self) -> bool {
        self.visibility.unwrap_or(true)
    }
}
