//! Page snapshots built from one full page payload

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::widget::{IconFormat, Widget, WidgetPayload, WidgetType};
use crate::xml::XmlElement;

/// One fetched page: metadata plus every widget in document order.
///
/// A snapshot is rebuilt from scratch for each full payload and belongs to
/// exactly one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
    pub id: Option<String>,
    pub title: String,
    pub icon: Option<String>,
    pub link: Option<String>,
    all_widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
struct PagePayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    widgets: Vec<WidgetPayload>,
}

impl PageSnapshot {
    /// Build from a JSON page object.
    pub fn from_json(value: &serde_json::Value, icon_format: IconFormat) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::payload("page root is not an object"));
        }
        let payload = PagePayload::deserialize(value)?;

        let mut all_widgets = Vec::new();
        for widget in payload.widgets {
            Widget::collect_json(widget, None, icon_format, &mut all_widgets);
        }

        let title = payload
            .title
            .or_else(|| payload.id.clone())
            .unwrap_or_default();
        Ok(Self {
            id: payload.id,
            title,
            icon: payload.icon,
            link: payload.link,
            all_widgets,
        })
    }

    /// Build from a legacy XML `<page>` document.
    pub fn from_xml(body: &str) -> Result<Self> {
        let root = XmlElement::parse(body)?;
        let mut snapshot = Self::default();
        for child in &root.children {
            match child.name.as_str() {
                "widget" => Widget::collect_xml(child, None, &mut snapshot.all_widgets),
                "title" => snapshot.title = child.text.clone(),
                "id" => snapshot.id = Some(child.text.clone()),
                "icon" => snapshot.icon = Some(child.text.clone()),
                "link" => snapshot.link = Some(child.text.clone()),
                _ => {}
            }
        }
        Ok(snapshot)
    }

    /// Every parsed widget, including deeper nesting levels
    pub fn all_widgets(&self) -> &[Widget] {
        &self.all_widgets
    }

    /// The widgets a page shows: top-level widgets and their direct
    /// children, minus frames that have no label.
    pub fn widgets(&self) -> Vec<Widget> {
        let top_level: HashSet<&str> = self
            .all_widgets
            .iter()
            .filter(|w| w.parent_id.is_none())
            .map(|w| w.id.as_str())
            .collect();

        self.all_widgets
            .iter()
            .filter(|w| match &w.parent_id {
                None => true,
                Some(parent) => top_level.contains(parent.as_str()),
            })
            .filter(|w| !(w.widget_type == WidgetType::Frame && w.effective_label().is_empty()))
            .cloned()
            .collect()
    }
}
