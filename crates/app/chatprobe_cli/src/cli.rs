use std::path::PathBuf;

use chatprobe_core::auth::Credential;
use chatprobe_core::config::{ClientConfig, ConfigError};
use clap::{Args, Parser, Subcommand};

use crate::Result;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and open an interactive chat session
    Connect(SessionArgs),
    /// Decode a bearer token and report its claims
    InspectToken(TokenArgs),
    /// Display version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct TokenArgs {
    /// Bearer token (a leading "Bearer " is ignored)
    #[arg(long, env = "CHATPROBE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Read the bearer token from a file
    #[arg(long, conflicts_with = "token")]
    pub token_file: Option<PathBuf>,
}

impl TokenArgs {
    /// Load the credential from the flag, the environment or the token file.
    pub fn resolve(&self) -> Result<Credential> {
        let raw = match (&self.token, &self.token_file) {
            (Some(token), _) => token.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => return Err(ConfigError::MissingToken.into()),
        };
        let credential = Credential::new(raw);
        if credential.is_empty() {
            return Err(ConfigError::MissingToken.into());
        }
        Ok(credential)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[command(flatten)]
    pub token: TokenArgs,

    /// Service base URL [env: CHATPROBE_BASE_URL]
    #[arg(long)]
    pub base_url: Option<String>,

    /// Chat hub name, path or URL [env: CHATPROBE_CHAT_HUB]
    #[arg(long)]
    pub chat_hub: Option<String>,

    /// Notification hub name, path or URL [env: CHATPROBE_NOTIFICATION_HUB]
    #[arg(long)]
    pub notification_hub: Option<String>,

    /// Do not re-join the last conversation after a reconnect
    #[arg(long)]
    pub no_rejoin: bool,

    /// Connect hub WebSockets directly, skipping negotiation
    #[arg(long)]
    pub skip_negotiation: bool,
}

impl SessionArgs {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(hub) = &self.chat_hub {
            config.chat_hub = hub.clone();
        }
        if let Some(hub) = &self.notification_hub {
            config.notification_hub = hub.clone();
        }
        if self.no_rejoin {
            config.rejoin_on_reconnect = false;
        }
        if self.skip_negotiation {
            config.skip_negotiation = true;
        }
        config
    }
}
