//! Client configuration.

use thiserror::Error;
use url::Url;

/// Default service base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.toxiq.xyz";

/// Default chat hub name (resolved to `{base}/hubs/chat`).
pub const DEFAULT_CHAT_HUB: &str = "chat";

/// Default notification hub name (resolved to `{base}/hubs/notification`).
pub const DEFAULT_NOTIFICATION_HUB: &str = "notification";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid base URL {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Base URL must use http or https: {0}")]
    UnsupportedScheme(String),

    #[error("No bearer token provided")]
    MissingToken,
}

/// Configuration for one diagnostic session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Service base URL (REST API and hubs).
    pub base_url: String,
    /// Chat hub name, relative path or absolute URL.
    pub chat_hub: String,
    /// Notification hub name, relative path or absolute URL.
    pub notification_hub: String,
    /// Re-join the last joined conversation after the chat hub reconnects.
    pub rejoin_on_reconnect: bool,
    /// Connect hub WebSockets directly without the negotiate round-trip.
    pub skip_negotiation: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            chat_hub: DEFAULT_CHAT_HUB.into(),
            notification_hub: DEFAULT_NOTIFICATION_HUB.into(),
            rejoin_on_reconnect: true,
            skip_negotiation: false,
        }
    }
}

impl ClientConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                     | Default                 |
    /// |------------------------------|-------------------------|
    /// | `CHATPROBE_BASE_URL`         | `https://api.toxiq.xyz` |
    /// | `CHATPROBE_CHAT_HUB`         | `chat`                  |
    /// | `CHATPROBE_NOTIFICATION_HUB` | `notification`          |
    /// | `CHATPROBE_REJOIN`           | `true`                  |
    /// | `CHATPROBE_SKIP_NEGOTIATION` | `false`                 |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("CHATPROBE_BASE_URL").unwrap_or(defaults.base_url),
            chat_hub: std::env::var("CHATPROBE_CHAT_HUB").unwrap_or(defaults.chat_hub),
            notification_hub: std::env::var("CHATPROBE_NOTIFICATION_HUB")
                .unwrap_or(defaults.notification_hub),
            rejoin_on_reconnect: env_flag("CHATPROBE_REJOIN").unwrap_or(defaults.rejoin_on_reconnect),
            skip_negotiation: env_flag("CHATPROBE_SKIP_NEGOTIATION")
                .unwrap_or(defaults.skip_negotiation),
        }
    }

    /// Parse and check the base URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.base_url)
    }
}

/// Parse a base URL, normalizing it to end with `/` so relative joins
/// append rather than replace the last path segment.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::UnsupportedScheme(raw.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
