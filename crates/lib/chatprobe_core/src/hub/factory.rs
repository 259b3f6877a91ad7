//! Channel construction.

use std::sync::Arc;

use url::Url;

use super::connection::{HubConnection, HubOptions};
use super::{HubChannel, HubError};
use crate::auth::Credential;
use crate::context::RequestContext;

/// Builds unstarted channels. Building never performs I/O.
pub trait ChannelFactory: Send + Sync {
    fn build(&self, hub_path: &str, token: &Credential) -> Result<Arc<dyn HubChannel>, HubError>;
}

/// Factory producing WebSocket [`HubConnection`]s rooted at the context's base URL.
#[derive(Debug, Clone)]
pub struct WsChannelFactory {
    ctx: RequestContext,
    options: HubOptions,
}

impl WsChannelFactory {
    pub fn new(ctx: RequestContext) -> Self {
        Self::with_options(ctx, HubOptions::default())
    }

    pub fn with_options(ctx: RequestContext, options: HubOptions) -> Self {
        Self { ctx, options }
    }
}

impl ChannelFactory for WsChannelFactory {
    fn build(&self, hub_path: &str, token: &Credential) -> Result<Arc<dyn HubChannel>, HubError> {
        let url = resolve_hub_url(self.ctx.base_url(), hub_path)?;
        Ok(Arc::new(HubConnection::new(
            url,
            token.clone(),
            self.ctx.http().clone(),
            self.options.clone(),
        )))
    }
}

/// Resolve a hub path against `base`.
///
/// - bare name (`chat`) → `{base}/hubs/chat`
/// - relative path (`hubs/chat`, `/chatHub`) → joined under `base`
/// - absolute `http(s)://` or `ws(s)://` URL → used as-is
pub fn resolve_hub_url(base: &Url, hub_path: &str) -> Result<Url, HubError> {
    let path = hub_path.trim();
    if path.is_empty() {
        return Err(HubError::InvalidUrl("empty hub path".into()));
    }

    if path.contains("://") {
        let url = Url::parse(path).map_err(|e| HubError::InvalidUrl(format!("{path}: {e}")))?;
        return match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(url),
            other => Err(HubError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {path}"
            ))),
        };
    }

    let relative = if path.contains('/') {
        path.trim_start_matches('/').to_string()
    } else {
        format!("hubs/{path}")
    };
    base.join(&relative)
        .map_err(|e| HubError::InvalidUrl(format!("{relative}: {e}")))
}
