//! Widgets: the nodes of a sitemap page
//!
//! A page payload is a tree of widgets. Parsing flattens it into document
//! order, recording each widget's parent id so the tree can be rebuilt by
//! consumers. Values that have a widget-level override, an item-level
//! description and a type default (min, max, step, label) are resolved on
//! every access rather than stored.

use serde::Deserialize;
use tracing::debug;

use crate::item::{Item, ItemPayload, ItemType, LabeledValue};
use crate::linked_page::{LinkedPage, LinkedPagePayload};
use crate::parsed_state::{parse_state, ParsedState};
use crate::xml::XmlElement;

/// Widget kinds known to the client. Anything else parses as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetType {
    Button,
    Buttongrid,
    Chart,
    Colorpicker,
    Colortemperaturepicker,
    Default,
    Frame,
    Group,
    Image,
    Input,
    Mapview,
    Selection,
    Setpoint,
    Slider,
    Switch,
    Text,
    Video,
    Webview,
    Unknown,
}

impl WidgetType {
    pub fn from_type_str(value: &str) -> Self {
        match value {
            "Button" => WidgetType::Button,
            "Buttongrid" => WidgetType::Buttongrid,
            "Chart" => WidgetType::Chart,
            "Colorpicker" => WidgetType::Colorpicker,
            "Colortemperaturepicker" => WidgetType::Colortemperaturepicker,
            "Default" => WidgetType::Default,
            "Frame" => WidgetType::Frame,
            "Group" => WidgetType::Group,
            "Image" => WidgetType::Image,
            "Input" => WidgetType::Input,
            "Mapview" => WidgetType::Mapview,
            "Selection" => WidgetType::Selection,
            "Setpoint" => WidgetType::Setpoint,
            "Slider" => WidgetType::Slider,
            "Switch" => WidgetType::Switch,
            "Text" => WidgetType::Text,
            "Video" => WidgetType::Video,
            "Webview" => WidgetType::Webview,
            _ => WidgetType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetType::Button => "Button",
            WidgetType::Buttongrid => "Buttongrid",
            WidgetType::Chart => "Chart",
            WidgetType::Colorpicker => "Colorpicker",
            WidgetType::Colortemperaturepicker => "Colortemperaturepicker",
            WidgetType::Default => "Default",
            WidgetType::Frame => "Frame",
            WidgetType::Group => "Group",
            WidgetType::Image => "Image",
            WidgetType::Input => "Input",
            WidgetType::Mapview => "Mapview",
            WidgetType::Selection => "Selection",
            WidgetType::Setpoint => "Setpoint",
            WidgetType::Slider => "Slider",
            WidgetType::Switch => "Switch",
            WidgetType::Text => "Text",
            WidgetType::Video => "Video",
            WidgetType::Webview => "Webview",
            WidgetType::Unknown => "Unknown",
        }
    }

    /// Fallback `(min, max, step)` when neither widget nor item specify one
    fn default_range(self) -> (f64, f64, f64) {
        match self {
            WidgetType::Colortemperaturepicker => (1000.0, 10000.0, 100.0),
            _ => (0.0, 100.0, 1.0),
        }
    }
}

/// Icon image format requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IconFormat {
    #[default]
    Png,
    Svg,
}

impl IconFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            IconFormat::Png => "PNG",
            IconFormat::Svg => "SVG",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: String,
    pub parent_id: Option<String>,
    /// Label as sent by the server, including any `[state]` suffix
    pub raw_label: String,
    /// Display part of the label
    pub label: String,
    /// Bracketed state text from the label, used when no item state renders
    pub state_label: Option<String>,
    pub icon: Option<String>,
    pub icon_path: String,
    pub state: Option<ParsedState>,
    pub widget_type: WidgetType,
    pub url: Option<String>,
    pub item: Option<Item>,
    pub linked_page: Option<LinkedPage>,
    pub mappings: Vec<LabeledValue>,
    pub encoding: Option<String>,
    pub icon_color: Option<String>,
    pub label_color: Option<String>,
    pub value_color: Option<String>,
    /// Refresh interval in milliseconds, 0 for none
    pub refresh: u32,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub step: Option<f64>,
    pub period: String,
    pub service: String,
    pub legend: Option<bool>,
    pub switch_support: bool,
    pub height: u32,
    pub visibility: bool,
}

impl Widget {
    pub fn effective_min(&self) -> f64 {
        let (default_min, _, _) = self.widget_type.default_range();
        self.min_value
            .or_else(|| self.item.as_ref().and_then(|i| i.minimum))
            .unwrap_or(default_min)
    }

    /// Never below [`Widget::effective_min`]
    pub fn effective_max(&self) -> f64 {
        let (_, default_max, _) = self.widget_type.default_range();
        let max = self
            .max_value
            .or_else(|| self.item.as_ref().and_then(|i| i.maximum))
            .unwrap_or(default_max);
        max.max(self.effective_min())
    }

    pub fn effective_step(&self) -> f64 {
        let (_, _, default_step) = self.widget_type.default_range();
        self.step
            .or_else(|| self.item.as_ref().and_then(|i| i.step))
            .unwrap_or(default_step)
            .abs()
    }

    pub fn effective_label(&self) -> &str {
        if !self.label.is_empty() {
            return &self.label;
        }
        match &self.item {
            Some(item) => item.label.as_deref().unwrap_or(&item.name),
            None => "",
        }
    }

    pub fn has_mappings(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// Widget mappings, or the item's command options when there are none
    pub fn mappings_or_item_options(&self) -> &[LabeledValue] {
        if self.mappings.is_empty() {
            if let Some(options) = self.item.as_ref().and_then(|i| i.options.as_ref()) {
                return options;
            }
        }
        &self.mappings
    }

    /// Apply an incremental change from the event stream.
    ///
    /// Identity, type, linked page, mappings and layout fields are kept.
    pub fn update_from_event(&self, event: WidgetEventPayload, icon_format: IconFormat) -> Widget {
        let item = Item::update_from_event(self.item.as_ref(), event.item);
        let raw_icon = event.icon.or_else(|| self.raw_icon());
        let raw_label = event.label.unwrap_or_else(|| self.raw_label.clone());
        let (label, state_label) = split_label(&raw_label);

        Widget {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            raw_label,
            label,
            state_label,
            icon_path: icon_path(
                item.as_ref(),
                self.widget_type,
                raw_icon.as_deref(),
                icon_format,
                self.has_mappings(),
            ),
            icon: sanitize_icon(raw_icon),
            state: determine_state(event.state.as_deref(), item.as_ref()),
            widget_type: self.widget_type,
            url: self.url.clone(),
            item,
            linked_page: self.linked_page.clone(),
            mappings: self.mappings.clone(),
            encoding: self.encoding.clone(),
            icon_color: event.iconcolor.or_else(|| self.icon_color.clone()),
            label_color: event.labelcolor.or_else(|| self.label_color.clone()),
            value_color: event.valuecolor.or_else(|| self.value_color.clone()),
            refresh: self.refresh,
            min_value: self.min_value,
            max_value: self.max_value,
            step: self.step,
            period: self.period.clone(),
            service: self.service.clone(),
            legend: self.legend,
            switch_support: self.switch_support,
            height: self.height,
            visibility: event.visibility.unwrap_or(self.visibility),
        }
    }

    fn raw_icon(&self) -> Option<String> {
        Some(self.icon.clone().unwrap_or_else(|| "none".to_string()))
    }

    /// Flatten a JSON widget object and its children into `out`.
    pub fn collect_json(
        payload: WidgetPayload,
        parent_id: Option<&str>,
        icon_format: IconFormat,
        out: &mut Vec<Widget>,
    ) {
        let Some(id) = payload.widget_id else {
            debug!("Skipping widget without id ({:?})", payload.widget_type);
            return;
        };

        let item = payload.item.map(ItemPayload::into_item);
        let widget_type = payload
            .widget_type
            .as_deref()
            .map(WidgetType::from_type_str)
            .unwrap_or(WidgetType::Unknown);
        let mappings: Vec<LabeledValue> = payload
            .mappings
            .into_iter()
            .map(|m| LabeledValue {
                value: m.command,
                label: m.label.unwrap_or_default(),
            })
            .collect();
        let raw_label = payload.label.unwrap_or_default();
        let (label, state_label) = split_label(&raw_label);

        let widget = Widget {
            parent_id: parent_id.map(str::to_string),
            raw_label,
            label,
            state_label,
            icon_path: icon_path(
                item.as_ref(),
                widget_type,
                payload.icon.as_deref(),
                icon_format,
                !mappings.is_empty(),
            ),
            icon: sanitize_icon(payload.icon),
            state: determine_state(payload.state.as_deref(), item.as_ref()),
            widget_type,
            url: payload.url,
            linked_page: payload
                .linked_page
                .and_then(LinkedPagePayload::into_linked_page),
            item,
            mappings,
            encoding: payload.encoding,
            icon_color: payload.iconcolor,
            label_color: payload.labelcolor,
            value_color: payload.valuecolor,
            refresh: sanitize_refresh(payload.refresh.unwrap_or(0)),
            min_value: payload.min_value,
            max_value: payload.max_value,
            step: payload.step,
            period: sanitize_period(payload.period),
            service: payload.service.unwrap_or_default(),
            legend: payload.legend,
            switch_support: payload.switch_support.unwrap_or(false),
            height: payload.height.unwrap_or(0),
            visibility: payload.visibility.unwrap_or(true),
            id,
        };

        let own_id = widget.id.clone();
        out.push(widget);
        for child in payload.widgets {
            Widget::collect_json(child, Some(&own_id), icon_format, out);
        }
    }

    /// Flatten a legacy XML `<widget>` element and its children into `out`.
    pub(crate) fn collect_xml(element: &XmlElement, parent_id: Option<&str>, out: &mut Vec<Widget>) {
        let Some(id) = element.child_text("widgetId") else {
            debug!("Skipping XML widget without id");
            return;
        };

        let text = |name: &str| element.child_text(name).map(str::to_string);
        let number = |name: &str| element.child_text(name).and_then(|v| v.trim().parse::<f64>().ok());
        let integer = |name: &str| element.child_text(name).and_then(|v| v.trim().parse::<u32>().ok());

        let item = element.child("item").and_then(Item::from_xml);
        let linked_page = element.child("linkedPage").and_then(LinkedPage::from_xml);
        let mappings = element
            .children_named("mapping")
            .map(|m| LabeledValue {
                value: m.child_text("command").unwrap_or_default().to_string(),
                label: m.child_text("label").unwrap_or_default().to_string(),
            })
            .collect();
        let raw_label = text("label").unwrap_or_default();
        let (label, state_label) = split_label(&raw_label);
        let raw_icon = text("icon");

        let widget = Widget {
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            raw_label,
            label,
            state_label,
            icon_path: format!("images/{}.png", raw_icon.as_deref().unwrap_or("none")),
            icon: sanitize_icon(raw_icon),
            state: item.as_ref().and_then(|i| i.state.clone()),
            widget_type: element
                .child_text("type")
                .map(WidgetType::from_type_str)
                .unwrap_or(WidgetType::Unknown),
            url: text("url"),
            item,
            linked_page,
            mappings,
            encoding: text("encoding"),
            icon_color: text("iconcolor"),
            label_color: text("labelcolor"),
            value_color: text("valuecolor"),
            refresh: sanitize_refresh(integer("refresh").unwrap_or(0)),
            min_value: number("minValue"),
            max_value: number("maxValue"),
            step: number("step"),
            period: sanitize_period(text("period")),
            service: text("service").unwrap_or_default(),
            legend: None,
            switch_support: element
                .child_text("switchSupport")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            height: integer("height").unwrap_or(0),
            visibility: true,
        };

        out.push(widget);
        for child in element.children_named("widget") {
            Widget::collect_xml(child, Some(id), out);
        }
    }
}

/// Split `"Temperature [21.5 °C]"` into `("Temperature", Some("21.5 °C"))`.
///
/// Labels without a bracketed suffix have no state part.
pub fn split_label(raw: &str) -> (String, Option<String>) {
    let Some(open) = raw.find('[') else {
        return (raw.to_string(), None);
    };
    let rest = &raw[open + 1..];
    match rest.rfind(']') {
        Some(close) => (
            raw[..open].trim_end().to_string(),
            Some(rest[..close].trim().to_string()),
        ),
        None => (raw.to_string(), None),
    }
}

fn sanitize_icon(icon: Option<String>) -> Option<String> {
    icon.filter(|i| i != "none")
}

fn sanitize_refresh(refresh: u32) -> u32 {
    if (1..=99).contains(&refresh) {
        100
    } else {
        refresh
    }
}

fn sanitize_period(period: Option<String>) -> String {
    period
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "D".to_string())
}

fn determine_state(state: Option<&str>, item: Option<&Item>) -> Option<ParsedState> {
    let pattern = item.and_then(Item::number_pattern);
    parse_state(state, pattern).or_else(|| item.and_then(|i| i.state.clone()))
}

/// Server-relative icon path carrying the state that selects the icon variant.
fn icon_path(
    item: Option<&Item>,
    widget_type: WidgetType,
    icon: Option<&str>,
    format: IconFormat,
    has_mappings: bool,
) -> String {
    let mut icon_state = String::new();
    if let Some((item, state)) = item.and_then(|i| i.state.as_ref().map(|s| (i, s))) {
        icon_state = state.as_str().to_string();
        if item.is_of_type_or_group_type(ItemType::Color) {
            if widget_type == WidgetType::Slider
                || (widget_type == WidgetType::Switch && !has_mappings)
            {
                let brightness = state.as_brightness().unwrap_or(0);
                icon_state = if widget_type == WidgetType::Switch {
                    let on = brightness != 0;
                    (if on { "ON" } else { "OFF" }).to_string()
                } else {
                    brightness.to_string()
                };
            } else if let Some(hsv) = state.as_hsv() {
                icon_state = hsv.to_hex();
            }
        } else if widget_type == WidgetType::Switch
            && !has_mappings
            && !item.is_of_type_or_group_type(ItemType::Rollershutter)
        {
            // Dimmers behind a plain switch still want the ON/OFF icon
            icon_state = if matches!(state.as_str(), "0" | "OFF") {
                "OFF"
            } else {
                "ON"
            }
            .to_string();
        }
    }

    format!(
        "icon/{}?state={}&format={}",
        icon.unwrap_or("none"),
        icon_state,
        format.as_str()
    )
}

// ─────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────

/// Widget object in a JSON page
#[derive(Debug, Clone, Deserialize)]
pub struct WidgetPayload {
    #[serde(rename = "widgetId", default)]
    pub widget_id: Option<String>,
    #[serde(rename = "type", default)]
    pub widget_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub item: Option<ItemPayload>,
    #[serde(rename = "linkedPage", default)]
    pub linked_page: Option<LinkedPagePayload>,
    #[serde(default)]
    pub mappings: Vec<MappingPayload>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub iconcolor: Option<String>,
    #[serde(default)]
    pub labelcolor: Option<String>,
    #[serde(default)]
    pub valuecolor: Option<String>,
    #[serde(default)]
    pub refresh: Option<u32>,
    #[serde(rename = "minValue", default)]
    pub min_value: Option<f64>,
    #[serde(rename = "maxValue", default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub legend: Option<bool>,
    #[serde(rename = "switchSupport", default)]
    pub switch_support: Option<bool>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub visibility: Option<bool>,
    #[serde(default)]
    pub widgets: Vec<WidgetPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingPayload {
    pub command: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Changed fields of a widget, as carried by a stream event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WidgetEventPayload {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub item: Option<ItemPayload>,
    #[serde(default)]
    pub iconcolor: Option<String>,
    #[serde(default)]
    pub labelcolor: Option<String>,
    #[serde(default)]
    pub valuecolor: Option<String>,
    #[serde(default)]
    pub visibility: Option<bool>,
}
