//! Items: the named, typed values widgets are bound to

use serde::Deserialize;

use crate::error::Result;
use crate::parsed_state::{parse_state, ParsedState};
use crate::xml::XmlElement;

/// Semantic item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemType {
    #[default]
    None,
    Call,
    Color,
    Contact,
    DateTime,
    Dimmer,
    Group,
    Image,
    Location,
    Number,
    NumberWithDimension,
    Player,
    Rollershutter,
    StringItem,
    Switch,
}

impl ItemType {
    /// Parse a server type string.
    ///
    /// Handles the legacy `SwitchItem` spelling and dimension suffixes
    /// (`Number:Temperature`). Unknown types map to [`ItemType::None`].
    pub fn from_type_str(value: &str) -> Self {
        let value = value.strip_suffix("Item").unwrap_or(value);
        let (base, has_dimension) = match value.find(':') {
            Some(pos) if pos > 0 => (&value[..pos], true),
            _ => (value, false),
        };
        match base {
            "Call" => ItemType::Call,
            "Color" => ItemType::Color,
            "Contact" => ItemType::Contact,
            "DateTime" => ItemType::DateTime,
            "Dimmer" => ItemType::Dimmer,
            "Group" => ItemType::Group,
            "Image" => ItemType::Image,
            "Location" => ItemType::Location,
            "Number" if has_dimension => ItemType::NumberWithDimension,
            "Number" => ItemType::Number,
            "Player" => ItemType::Player,
            "Rollershutter" => ItemType::Rollershutter,
            "String" => ItemType::StringItem,
            "Switch" => ItemType::Switch,
            _ => ItemType::None,
        }
    }
}

/// A value/label pair: widget mappings and item command options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledValue {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub label: Option<String>,
    pub item_type: ItemType,
    pub group_type: Option<ItemType>,
    pub link: Option<String>,
    pub read_only: bool,
    pub members: Vec<Item>,
    pub options: Option<Vec<LabeledValue>>,
    pub state: Option<ParsedState>,
    pub tags: Vec<String>,
    pub group_names: Vec<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub step: Option<f64>,
}

impl Item {
    /// Whether the item, or the group's member type, is `item_type`
    pub fn is_of_type_or_group_type(&self, item_type: ItemType) -> bool {
        self.item_type == item_type || self.group_type() == Some(item_type)
    }

    /// Member type of a group item; absent for every other type
    pub fn group_type(&self) -> Option<ItemType> {
        if self.item_type == ItemType::Group {
            self.group_type
        } else {
            None
        }
    }

    /// Number pattern from the item's state description
    pub fn number_pattern(&self) -> Option<&str> {
        self.state.as_ref().and_then(ParsedState::number_pattern)
    }

    /// Parse an item object from a JSON payload
    pub fn from_json(value: &serde_json::Value) -> Result<Item> {
        let payload = ItemPayload::deserialize(value)?;
        Ok(payload.into_item())
    }

    /// Apply an item object from an incremental event.
    ///
    /// Events never carry the item link, so it is kept from `previous`.
    pub fn update_from_event(previous: Option<&Item>, payload: Option<ItemPayload>) -> Option<Item> {
        let Some(payload) = payload else {
            return previous.cloned();
        };
        let mut item = payload.into_item();
        if let Some(previous) = previous {
            item.link = previous.link.clone();
        }
        Some(item)
    }

    pub(crate) fn from_xml(element: &XmlElement) -> Option<Item> {
        let name = element.child_text("name")?.to_string();
        let mut state = element.child_text("state");
        if matches!(state, Some("Uninitialized") | Some("Undefined")) {
            state = None;
        }
        let state = state.filter(|s| !is_null_state(s));
        let item_type = element
            .child_text("type")
            .map(ItemType::from_type_str)
            .unwrap_or_default();
        let group_type = element.child_text("groupType").map(ItemType::from_type_str);

        Some(Item {
            label: Some(name.clone()),
            name,
            item_type,
            group_type,
            link: element.child_text("link").map(str::to_string),
            read_only: false,
            members: Vec::new(),
            options: None,
            state: parse_state(state, None),
            tags: Vec::new(),
            group_names: Vec::new(),
            minimum: None,
            maximum: None,
            step: None,
        })
    }
}

fn is_null_state(state: &str) -> bool {
    state == "NULL" || state == "UNDEF" || state.eq_ignore_ascii_case("undefined")
}

// ─────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────

/// Item object as sent in JSON pages and events
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub group_type: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub state_description: Option<StateDescriptionPayload>,
    #[serde(default)]
    pub members: Vec<ItemPayload>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub group_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDescriptionPayload {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<OptionPayload>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionPayload {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl ItemPayload {
    pub fn into_item(self) -> Item {
        let description = self.state_description.unwrap_or_default();
        let state = self.state.as_deref().filter(|s| !is_null_state(s));
        let state = parse_state(state, description.pattern.as_deref());
        let options = description.options.map(|options| {
            options
                .into_iter()
                .map(|o| LabeledValue {
                    label: o.label.unwrap_or_else(|| o.value.clone()),
                    value: o.value,
                })
                .collect()
        });

        Item {
            label: Some(self.label.unwrap_or_else(|| self.name.clone())),
            item_type: self
                .item_type
                .as_deref()
                .map(ItemType::from_type_str)
                .unwrap_or_default(),
            group_type: self.group_type.as_deref().map(ItemType::from_type_str),
            link: self.link,
            read_only: description.read_only,
            members: self.members.into_iter().map(ItemPayload::into_item).collect(),
            options,
            state,
            tags: self.tags,
            group_names: self.group_names,
            minimum: description.minimum,
            maximum: description.maximum,
            step: description.step,
            name: self.name,
        }
    }
}
