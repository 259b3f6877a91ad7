//! Session client for the chat hub.
//!
//! Wraps one [`HubChannel`]: registers the chat event handlers once, turns
//! lifecycle notifications into status lines, and joins and sends with the
//! fallbacks the chat service needs. Every operation reports its own failures
//! through the status callback and returns `bool`.

pub mod strategy;


use std::error::Error as StdError;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::hub::{HubChannel, HubError, HubState, LifecycleEvent, render_error, subscribe};
use crate::models::Message;

pub use strategy::{JOIN_METHOD, JoinFailure, JoinStrategy};

/// Hub method used for live sends.
pub const SEND_METHOD: &str = "SendMessage";

/// Receives human-readable status lines. Called from background tasks.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives chat messages pushed by the server. Called from background tasks.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Message text and, when present, its immediate source (one level only).
pub fn describe_error(err: &(dyn StdError + 'static)) -> (String, Option<String>) {
    (err.to_string(), err.source().map(ToString::to_string))
}

/// Start `channel`, reporting a failure through `report`.
pub async fn start_channel(channel: &dyn HubChannel, report: &(dyn Fn(&str) + Sync)) -> bool {
    match channel.start().await {
        Ok(()) => true,
        Err(e) => {
            report_connect_failure(channel.url(), &e, report);
            false
        }
    }
}

/// `Failed to connect to <target>: <message>`, then `Inner exception: <cause>`
/// when the error has one.
pub fn report_connect_failure(target: &str, err: &HubError, report: &dyn Fn(&str)) {
    let (message, inner) = describe_error(err);
    warn!(hub = target, error = %message, "hub connection failed");
    report(&format!("Failed to connect to {target}: {message}"));
    if let Some(inner) = inner {
        report(&format!("Inner exception: {inner}"));
    }
}

pub struct SessionClient {
    channel: Arc<dyn HubChannel>,
    identity: Option<Identity>,
    status: StatusCallback,
    message_callback: Arc<RwLock<Option<MessageCallback>>>,
    last_joined: Mutex<Option<Uuid>>,
}

impl SessionClient {
    /// Wrap `channel` and register the chat handlers on it.
    ///
    /// With `rejoin_on_reconnect`, the last joined conversation is joined
    /// again each time the channel recovers from a drop.
    pub fn new(
        channel: Arc<dyn HubChannel>,
        identity: Option<Identity>,
        status: StatusCallback,
        rejoin_on_reconnect: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let message_callback: Arc<RwLock<Option<MessageCallback>>> = Arc::default();
            register_handlers(channel.as_ref(), &status, &message_callback);
            register_lifecycle(
                channel.as_ref(),
                &status,
                rejoin_on_reconnect.then(|| weak.clone()),
            );
            Self {
                channel,
                identity,
                status,
                message_callback,
                last_joined: Mutex::new(None),
            }
        })
    }

    pub fn channel(&self) -> &Arc<dyn HubChannel> {
        &self.channel
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn state(&self) -> HubState {
        self.channel.state()
    }

    /// Most recently joined conversation.
    pub fn last_joined(&self) -> Option<Uuid> {
        *self
            .last_joined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the single message subscriber, replacing any previous one.
    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self
            .message_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Start the channel. Failures are reported with their inner cause.
    pub async fn start(&self) -> bool {
        start_channel(self.channel.as_ref(), &|line: &str| self.report(line)).await
    }

    /// Start the channel unless it is already connected.
    pub async fn ensure_connected(&self) -> bool {
        if self.channel.state() == HubState::Connected {
            return true;
        }
        match self.channel.start().await {
            Ok(()) => self.channel.state() == HubState::Connected,
            Err(e) => {
                self.report(&format!("Reconnection failed: {}", render_error(&e)));
                false
            }
        }
    }

    /// Join `conversation_id`, trying each argument shape in order.
    pub async fn join_conversation(&self, conversation_id: Uuid) -> bool {
        self.report(&format!(
            "Attempting to join conversation: {conversation_id}"
        ));

        if self.channel.state() != HubState::Connected {
            self.report("Connection is not active. Reconnecting...");
            if !self.ensure_connected().await {
                return false;
            }
        }

        let mut failure = JoinFailure::default();
        for strategy in JoinStrategy::plan(conversation_id, self.identity.as_ref()) {
            match self.channel.invoke(JOIN_METHOD, strategy.arguments()).await {
                Ok(_) => {
                    *self
                        .last_joined
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(conversation_id);
                    info!(%conversation_id, approach = strategy.ordinal(), "joined conversation");
                    self.report(&format!(
                        "Successfully joined conversation{}: {conversation_id}",
                        strategy.success_label()
                    ));
                    return true;
                }
                Err(e) => {
                    let cause = e.to_string();
                    self.report(&format!("Approach {} failed: {cause}", strategy.ordinal()));
                    failure.push(strategy.ordinal(), cause);
                }
            }
        }

        warn!(%conversation_id, attempts = failure.attempts(), "all join approaches failed");
        self.report(&format!("Error joining conversation: {failure}"));
        false
    }

    /// Send `content` over the live channel with a single invocation.
    pub async fn send(&self, conversation_id: Uuid, content: &str) -> bool {
        if !self.ensure_connected().await {
            self.report("Error sending message: connection is not active");
            return false;
        }
        match self
            .channel
            .invoke(SEND_METHOD, vec![json!(conversation_id), json!(content)])
            .await
        {
            Ok(_) => {
                debug!(%conversation_id, "message sent over hub");
                true
            }
            Err(e) => {
                self.report(&format!("Error sending message: {e}"));
                false
            }
        }
    }

    pub async fn stop(&self) {
        self.channel.stop().await;
    }

    fn report(&self, line: &str) {
        (self.status)(line);
    }

    async fn rejoin(self: Arc<Self>, conversation_id: Uuid) {
        self.report(&format!(
            "Rejoining conversation after reconnect: {conversation_id}"
        ));
        self.join_conversation(conversation_id).await;
    }
}

fn register_handlers(
    channel: &dyn HubChannel,
    status: &StatusCallback,
    message_callback: &Arc<RwLock<Option<MessageCallback>>>,
) {
    let slot = Arc::clone(message_callback);
    subscribe::<Message, _>(channel, "ReceiveMessage", move |message| {
        let callback = slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => callback(message),
            None => debug!(id = %message.id, "message received with no subscriber"),
        }
    });

    let report = Arc::clone(status);
    subscribe::<String, _>(channel, "SystemMessage", move |text| {
        report(&format!("[SYSTEM] {text}"));
    });

    let report = Arc::clone(status);
    subscribe::<String, _>(channel, "ChatConnected", move |text| {
        report(&format!("Chat Hub: {text}"));
    });

    let report = Arc::clone(status);
    subscribe::<Uuid, _>(channel, "JoinedConversation", move |id| {
        report(&format!("Joined conversation: {id}"));
    });
}

fn register_lifecycle(channel: &dyn HubChannel, status: &StatusCallback, rejoin: Option<Weak<SessionClient>>) {
    let report = Arc::clone(status);
    channel.on_lifecycle(Arc::new(move |event: &LifecycleEvent| match event {
        LifecycleEvent::Reconnecting { reason } => report(&format!(
            "Reconnecting to chat hub... Reason: {}",
            reason.as_deref().unwrap_or("Connection lost")
        )),
        LifecycleEvent::Reconnected { connection_id } => {
            report(&format!(
                "Reconnected to chat hub. ConnectionId: {}",
                connection_id.as_deref().unwrap_or("(none)")
            ));
            let Some(session) = rejoin.as_ref().and_then(Weak::upgrade) else {
                return;
            };
            let Some(conversation_id) = session.last_joined() else {
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(session.rejoin(conversation_id));
                }
                Err(_) => warn!(%conversation_id, "no runtime available to rejoin conversation"),
            }
        }
        LifecycleEvent::Closed { error: Some(error) } => {
            report(&format!("Connection closed with error: {error}"))
        }
        LifecycleEvent::Closed { error: None } => report("Connection closed"),
    }));
}
