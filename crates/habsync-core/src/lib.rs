//! # habsync-core - Sitemap Domain Model
//!
//! Foundation crate for habsync. Provides the sitemap domain types, the JSON
//! and legacy XML payload parsers, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, quick-xml, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Domain Types
//! - [`Widget`], [`WidgetType`] - One node of a sitemap page
//! - [`Item`], [`ItemType`] - The value a widget is bound to
//! - [`ParsedState`] - A state string parsed into boolean/number/color/location facets
//! - [`LinkedPage`] - Reference from a widget to a sub-page
//! - [`Sitemap`] - Entry of the server's sitemap list
//!
//! ### Pages and Events
//! - [`PageSnapshot`] - Widgets and metadata of one full page payload
//! - [`SitemapEvent`] - Incremental change decoded from the event stream
//!
//! ### Server Capabilities
//! - [`ServerFlags`], [`ServerProperties`] - What the server supports
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use habsync_core::prelude::*;
//! ```

pub mod error;
pub mod item;
pub mod linked_page;
pub mod logging;
pub mod page;
pub mod parsed_state;
pub mod prelude;
pub mod server;
pub mod sitemap;
pub mod sitemap_event;
pub mod widget;
mod xml;

pub use error::{Error, Result, ResultExt};
pub use item::{Item, ItemPayload, ItemType, LabeledValue};
pub use linked_page::LinkedPage;
pub use page::PageSnapshot;
pub use parsed_state::{parse_state, GeoLocation, HsvState, NumberState, ParsedState};
pub use server::{ServerFlags, ServerProperties};
pub use sitemap::{parse_sitemaps_json, parse_sitemaps_xml, Sitemap};
pub use sitemap_event::SitemapEvent;
pub use widget::{split_label, IconFormat, Widget, WidgetEventPayload, WidgetPayload, WidgetType};
