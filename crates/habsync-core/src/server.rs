//! Server capability flags

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::sitemap::Sitemap;
use crate::widget::IconFormat;

/// Set of capabilities detected from the server's REST root document.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServerFlags(u32);

impl ServerFlags {
    pub const JSON_REST_API: ServerFlags = ServerFlags(1 << 0);
    pub const SSE_SUPPORT: ServerFlags = ServerFlags(1 << 1);
    pub const ICON_FORMAT_SUPPORT: ServerFlags = ServerFlags(1 << 2);
    pub const CHART_SCALING_SUPPORT: ServerFlags = ServerFlags(1 << 3);
    pub const HABPANEL_INSTALLED: ServerFlags = ServerFlags(1 << 4);
    pub const INVISIBLE_WIDGETS: ServerFlags = ServerFlags(1 << 5);
    pub const ANY_FORMAT_ICON: ServerFlags = ServerFlags(1 << 6);

    pub const fn empty() -> Self {
        ServerFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        ServerFlags(bits)
    }

    pub const fn contains(self, other: ServerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Derive flags from the body of `GET rest`.
    ///
    /// A JSON root means a JSON API; a numeric `version` adds event stream
    /// support and, from version 2 and 3, invisible widgets and any-format
    /// icons. An XML root is a legacy server without any of these.
    pub fn from_root_document(body: &str) -> Result<ServerFlags> {
        let root: RootPayload = match serde_json::from_str(body) {
            Ok(root) => root,
            Err(_) if body.trim_start().starts_with("<?xml") => return Ok(ServerFlags::empty()),
            Err(e) => return Err(Error::protocol(format!("unexpected REST root document: {e}"))),
        };

        let mut flags = ServerFlags::JSON_REST_API
            | ServerFlags::ICON_FORMAT_SUPPORT
            | ServerFlags::CHART_SCALING_SUPPORT;

        if let Some(version) = root.version.as_ref().and_then(version_number) {
            flags |= ServerFlags::SSE_SUPPORT;
            if version >= 2 {
                flags |= ServerFlags::INVISIBLE_WIDGETS;
            }
            if version >= 3 {
                flags |= ServerFlags::ANY_FORMAT_ICON;
            }
        }

        match root.links {
            Some(links) => {
                if links.iter().any(|l| l.link_type.as_deref() == Some("habpanel")) {
                    flags |= ServerFlags::HABPANEL_INSTALLED;
                }
            }
            None => tracing::warn!("REST root document has no 'links' array"),
        }

        Ok(flags)
    }
}

impl BitOr for ServerFlags {
    type Output = ServerFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ServerFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ServerFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ServerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ServerFlags, &str); 7] = [
            (ServerFlags::JSON_REST_API, "JSON_REST_API"),
            (ServerFlags::SSE_SUPPORT, "SSE_SUPPORT"),
            (ServerFlags::ICON_FORMAT_SUPPORT, "ICON_FORMAT_SUPPORT"),
            (ServerFlags::CHART_SCALING_SUPPORT, "CHART_SCALING_SUPPORT"),
            (ServerFlags::HABPANEL_INSTALLED, "HABPANEL_INSTALLED"),
            (ServerFlags::INVISIBLE_WIDGETS, "INVISIBLE_WIDGETS"),
            (ServerFlags::ANY_FORMAT_ICON, "ANY_FORMAT_ICON"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ServerFlags({})", names.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct RootPayload {
    #[serde(default)]
    version: Option<serde_json::Value>,
    #[serde(default)]
    links: Option<Vec<LinkPayload>>,
}

#[derive(Debug, Deserialize)]
struct LinkPayload {
    #[serde(rename = "type", default)]
    link_type: Option<String>,
}

fn version_number(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Capabilities and sitemaps of one server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerProperties {
    pub flags: ServerFlags,
    pub sitemaps: Vec<Sitemap>,
}

impl ServerProperties {
    pub fn new(flags: ServerFlags, sitemaps: Vec<Sitemap>) -> Self {
        Self { flags, sitemaps }
    }

    pub fn has_json_api(&self) -> bool {
        self.flags.contains(ServerFlags::JSON_REST_API)
    }

    pub fn has_sse_support(&self) -> bool {
        self.flags.contains(ServerFlags::SSE_SUPPORT)
    }

    pub fn has_habpanel_installed(&self) -> bool {
        self.flags.contains(ServerFlags::HABPANEL_INSTALLED)
    }

    pub fn has_invisible_widget_support(&self) -> bool {
        self.flags.contains(ServerFlags::INVISIBLE_WIDGETS)
    }

    /// Servers that accept a `format` parameter get SVG icons
    pub fn icon_format(&self) -> IconFormat {
        if self.flags.contains(ServerFlags::ICON_FORMAT_SUPPORT) {
            IconFormat::Svg
        } else {
            IconFormat::Png
        }
    }

    pub fn sitemap(&self, name: &str) -> Option<&Sitemap> {
        self.sitemaps.iter().find(|s| s.name == name)
    }
}
