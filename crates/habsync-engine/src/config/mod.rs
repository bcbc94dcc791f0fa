//! Configuration file parsing for habsync
//!
//! Supports `<config dir>/habsync/config.toml` or an explicit path.

pub mod settings;
pub mod types;

pub use settings::{default_config_path, init_config_file, load_settings, load_settings_or_default};
pub use types::*;
