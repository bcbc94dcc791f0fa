//! Settings loader for config.toml

use std::path::{Path, PathBuf};

use habsync_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "habsync";

/// `<config dir>/habsync/config.toml`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
}

/// Load settings from `path`.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Load from an explicit path, or from [`default_config_path`].
pub fn load_settings_or_default(path: Option<&Path>) -> Settings {
    match path {
        Some(path) => load_settings(path),
        None => match default_config_path() {
            Some(path) => load_settings(&path),
            None => Settings::default(),
        },
    }
}

/// Write a commented default config file unless one already exists.
pub fn init_config_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", dir, e)))?;
    }

    let default_content = r#"# habsync configuration

[connection]
plain_timeout_ms = 10000
long_poll_timeout_ms = 300000
user_agent = ""             # Empty = built-in default

[events]
max_retries = 10            # Failed subscriptions before falling back to polling
initial_backoff_ms = 1000
max_backoff_ms = 30000
reload_on_foreign_sitemap_change = true

[polling]
failure_backoff_initial_ms = 1000
failure_backoff_max_ms = 30000
parse_error_retry_ms = 1000

[logging]
detailed = false
"#;
    std::fs::write(path, default_content)
        .map_err(|e| Error::config(format!("Failed to write {:?}: {}", path, e)))?;
    info!("Created default config at {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_missing_file() {
        let temp = tempdir().unwrap();
        let settings = load_settings(&temp.path().join("config.toml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        let config = r#"
[connection]
long_poll_timeout_ms = 60000

[events]
reload_on_foreign_sitemap_change = false

[logging]
detailed = true
"#;
        std::fs::write(&path, config).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.connection.long_poll_timeout_ms, 60_000);
        assert_eq!(settings.connection.plain_timeout_ms, 10_000);
        assert!(!settings.events.reload_on_foreign_sitemap_change);
        assert!(settings.logging.detailed);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "not valid toml {{{{").unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_init_config_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("habsync").join("config.toml");

        init_config_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Settings = toml::from_str(&content).expect("Default config should be valid TOML");
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_init_config_file_idempotent() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[logging]\ndetailed = true\n").unwrap();

        init_config_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("detailed = true"));
    }

    #[test]
    fn test_load_settings_or_default_explicit_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "[events]\nmax_retries = 2\n").unwrap();

        let settings = load_settings_or_default(Some(&path));
        assert_eq!(settings.events.max_retries, 2);
    }
}
