//! Configuration types for habsync
//!
//! Defines:
//! - `Settings` - Contents of `config.toml`
//! - `SyncSettings` - The resolved values the sync engine runs with

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{Backoff, MIN_RETRY_DELAY};

/// Application settings (config.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub events: EventSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// HTTP request settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Timeout for plain page requests
    #[serde(default = "default_plain_timeout_ms")]
    pub plain_timeout_ms: u64,

    /// Timeout for long-poll requests; the server holds these open
    #[serde(default = "default_long_poll_timeout_ms")]
    pub long_poll_timeout_ms: u64,

    /// User agent override (empty = built-in default)
    #[serde(default)]
    pub user_agent: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            plain_timeout_ms: default_plain_timeout_ms(),
            long_poll_timeout_ms: default_long_poll_timeout_ms(),
            user_agent: String::new(),
        }
    }
}

/// Event stream settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventSettings {
    /// Consecutive failed subscriptions before falling back to polling
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Reload when the server reports a change to any sitemap, not only ours
    #[serde(default = "default_true")]
    pub reload_on_foreign_sitemap_change: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reload_on_foreign_sitemap_change: true,
        }
    }
}

/// Page polling settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollingSettings {
    #[serde(default = "default_initial_backoff_ms")]
    pub failure_backoff_initial_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub failure_backoff_max_ms: u64,

    /// Delay before retrying after an unparseable page payload
    #[serde(default = "default_parse_error_retry_ms")]
    pub parse_error_retry_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            failure_backoff_initial_ms: default_initial_backoff_ms(),
            failure_backoff_max_ms: default_max_backoff_ms(),
            parse_error_retry_ms: default_parse_error_retry_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log every widget of every full page update
    #[serde(default)]
    pub detailed: bool,
}

fn default_plain_timeout_ms() -> u64 {
    10_000
}

fn default_long_poll_timeout_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_parse_error_retry_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Values the page connections run with, resolved from [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub plain_timeout: Duration,
    pub long_poll_timeout: Duration,
    pub event_max_retries: u32,
    pub event_backoff: Backoff,
    pub failure_backoff: Backoff,
    pub parse_error_retry: Duration,
    pub reload_on_foreign_sitemap_change: bool,
    pub detailed_logging: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SyncSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            plain_timeout: delay_from_ms(
                "connection.plain_timeout_ms",
                settings.connection.plain_timeout_ms,
            ),
            long_poll_timeout: delay_from_ms(
                "connection.long_poll_timeout_ms",
                settings.connection.long_poll_timeout_ms,
            ),
            event_max_retries: settings.events.max_retries,
            event_backoff: backoff_from_ms(
                "events",
                settings.events.initial_backoff_ms,
                settings.events.max_backoff_ms,
            ),
            failure_backoff: backoff_from_ms(
                "polling.failure_backoff",
                settings.polling.failure_backoff_initial_ms,
                settings.polling.failure_backoff_max_ms,
            ),
            parse_error_retry: delay_from_ms(
                "polling.parse_error_retry_ms",
                settings.polling.parse_error_retry_ms,
            ),
            reload_on_foreign_sitemap_change: settings.events.reload_on_foreign_sitemap_change,
            detailed_logging: settings.logging.detailed,
        }
    }
}

/// Configured delay, raised to [`MIN_RETRY_DELAY`] so a zero value cannot
/// turn a retry into a busy loop.
fn delay_from_ms(key: &str, ms: u64) -> Duration {
    let delay = Duration::from_millis(ms);
    if delay < MIN_RETRY_DELAY {
        tracing::warn!(
            "{} = {}ms is below the {}ms minimum, using the minimum",
            key,
            ms,
            MIN_RETRY_DELAY.as_millis()
        );
        return MIN_RETRY_DELAY;
    }
    delay
}

/// The cap never drops below the first delay.
fn backoff_from_ms(key: &str, initial_ms: u64, max_ms: u64) -> Backoff {
    let initial = delay_from_ms(&format!("{}.initial", key), initial_ms);
    let max = Duration::from_millis(max_ms);
    if max < initial {
        tracing::warn!(
            "{}.max = {}ms is below the initial delay, using the initial delay",
            key,
            max_ms
        );
        return Backoff::new(initial, initial);
    }
    Backoff::new(initial, max)
}
