//! Real-time hub channels.
//!
//! A hub channel is a persistent WebSocket to one named hub endpoint that
//! carries the hub JSON protocol: the server pushes named events, the client
//! invokes named methods and awaits their completion.
//!
//! # Public API
//!
//! - [`HubChannel`]: the channel seam used by the session layer
//! - [`connection::HubConnection`]: WebSocket-backed channel with automatic reconnect
//! - [`factory::ChannelFactory`]: builds unstarted channels for a hub path
//! - [`subscribe`]: typed registration on top of the raw dispatch table

pub mod connection;
pub mod factory;
pub mod protocol;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use connection::{HubConnection, HubOptions};
pub use factory::{ChannelFactory, WsChannelFactory, resolve_hub_url};

/// Errors raised by hub channels.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),

    #[error("Negotiation request failed")]
    Negotiate(#[source] reqwest::Error),

    #[error("Negotiation rejected: {0}")]
    NegotiateRejected(String),

    #[error("WebSocket connection failed")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("The connection cannot be started while it is {0}")]
    InvalidState(HubState),

    #[error("The connection is not active, data cannot be sent")]
    NotConnected,

    #[error("{0}")]
    Invocation(String),

    #[error("Invocation of '{0}' timed out")]
    Timeout(String),

    #[error("{0}")]
    Closed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Render an error with its immediate source, as `message: cause`.
pub fn render_error(err: &(dyn std::error::Error + 'static)) -> String {
    match err.source() {
        Some(cause) => format!("{err}: {cause}"),
        None => err.to_string(),
    }
}

/// Lifecycle state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
        })
    }
}

/// Transport-driven lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The connection dropped and automatic reconnection has begun.
    Reconnecting { reason: Option<String> },
    /// Automatic reconnection succeeded.
    Reconnected { connection_id: Option<String> },
    /// The connection is closed and will not recover by itself.
    Closed { error: Option<String> },
}

/// Raw handler for an inbound event: receives the invocation arguments.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handler for lifecycle notifications.
pub type LifecycleHandler = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Persistent bidirectional channel to one hub.
///
/// Handlers registered with [`HubChannel::on`] survive reconnects.
#[async_trait]
pub trait HubChannel: Send + Sync {
    /// Hub endpoint this channel talks to.
    fn url(&self) -> &str;

    fn state(&self) -> HubState;

    /// Server-assigned id of the live connection, if known.
    fn connection_id(&self) -> Option<String>;

    /// Connect; only valid from [`HubState::Disconnected`] (no-op when connected).
    async fn start(&self) -> Result<(), HubError>;

    /// Close the connection and stop any reconnection in progress.
    async fn stop(&self);

    /// Invoke a hub method and wait for its completion.
    async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, HubError>;

    /// Register the handler for `event`, replacing any previous one.
    fn on(&self, event: &str, handler: EventHandler);

    /// Add a lifecycle listener.
    fn on_lifecycle(&self, handler: LifecycleHandler);
}

// =============================================================================
// Dispatch table
// =============================================================================

/// Event name → handler. Names match case-insensitively; one handler per name.
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<String, EventHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `event`, returning whether one was replaced.
    pub fn register(&self, event: &str, handler: EventHandler) -> bool {
        self.handlers
            .insert(event.to_ascii_lowercase(), handler)
            .is_some()
    }

    pub fn get(&self, event: &str) -> Option<EventHandler> {
        self.handlers
            .get(&event.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Run the handler for `event`; returns whether one was registered.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> bool {
        match self.get(event) {
            Some(handler) => {
                handler(args);
                true
            }
            None => {
                debug!(event, "no handler registered for hub event");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Multicast list of lifecycle listeners.
#[derive(Default)]
pub struct LifecycleListeners {
    listeners: RwLock<Vec<LifecycleHandler>>,
}

impl LifecycleListeners {
    pub fn add(&self, handler: LifecycleHandler) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn emit(&self, event: &LifecycleEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Register a typed handler that decodes the event's first argument as `T`.
///
/// Payloads that fail to decode are logged and dropped.
pub fn subscribe<T, F>(channel: &dyn HubChannel, event: &str, callback: F)
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    let name = event.to_string();
    channel.on(
        event,
        Arc::new(move |args: &[Value]| match args.first() {
            Some(raw) => match serde_json::from_value::<T>(raw.clone()) {
                Ok(value) => callback(value),
                Err(e) => warn!(event = %name, error = %e, "dropping undecodable hub event"),
            },
            None => warn!(event = %name, "hub event arrived without arguments"),
        }),
    );
}
