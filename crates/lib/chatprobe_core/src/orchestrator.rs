//! Connection orchestrator.
//!
//! Drives the login sequence (identity, token validation, chat hub,
//! notification hub, conversation list) and the user-facing operations on top
//! of it. A failing hub never aborts the sequence; only a rejected token does.
//! Everything user-visible goes through a [`SessionSink`].

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::api::{ApiError, ApiRoute, ChatApi};
use crate::auth::{CredentialContext, Identity};
use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::hub::{ChannelFactory, HubChannel, HubState, render_error, subscribe};
use crate::models::{Conversation, CreateGroupRequest, Message, Notification, SendMessageRequest};
use crate::session::{
    MessageCallback, SessionClient, StatusCallback, report_connect_failure, start_channel,
};

/// Severity of a user-facing alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

/// Consumer of everything the orchestrator reports.
///
/// Methods may be called from background tasks and must not block.
pub trait SessionSink: Send + Sync {
    /// One status line.
    fn status(&self, line: &str);
    /// One rendered chat transcript line.
    fn chat_line(&self, line: &str);
    /// Clear the transcript before a history load.
    fn clear_chat(&self);
    /// The latest conversation snapshot, in selection order.
    fn conversations(&self, snapshot: &[Conversation]);
    fn notification(&self, notification: &Notification);
    fn alert(&self, level: AlertLevel, title: &str, message: &str);
}

pub struct Orchestrator {
    config: ClientConfig,
    auth: CredentialContext,
    api: ChatApi,
    factory: Arc<dyn ChannelFactory>,
    sink: Arc<dyn SessionSink>,
    identity: RwLock<Option<Identity>>,
    chat: RwLock<Option<Arc<SessionClient>>>,
    notification: RwLock<Option<Arc<dyn HubChannel>>>,
    snapshot: Arc<StdRwLock<Vec<Conversation>>>,
    selected: RwLock<Option<Uuid>>,
}

impl Orchestrator {
    pub fn new(
        config: ClientConfig,
        ctx: RequestContext,
        factory: Arc<dyn ChannelFactory>,
        sink: Arc<dyn SessionSink>,
    ) -> Self {
        Self {
            config,
            auth: CredentialContext::new(ctx.clone()),
            api: ChatApi::new(ctx),
            factory,
            sink,
            identity: RwLock::new(None),
            chat: RwLock::new(None),
            notification: RwLock::new(None),
            snapshot: Arc::default(),
            selected: RwLock::new(None),
        }
    }

    // =========================================================================
    // Login sequence
    // =========================================================================

    /// Run the full login sequence. Returns `false` only when the token is
    /// rejected.
    pub async fn connect(&self) -> bool {
        let identity = self.auth.extract_identity();
        match &identity {
            Some(id) => self.status(&format!("Extracted user ID from token: {id}")),
            None => {
                self.status("Extracted user ID from token: (none)");
                self.sink.alert(
                    AlertLevel::Warning,
                    "Warning",
                    "Could not extract user ID from the token. Joining by user ID will be skipped.",
                );
            }
        }
        self.dump_claims();
        *self.identity.write().await = identity;
        self.initialize_hubs().await
    }

    fn dump_claims(&self) {
        match self.auth.claims() {
            Ok(claims) => {
                self.status(&format!("Token contains {} claims:", claims.len()));
                for claim in claims {
                    self.status(&format!("  {}: {}", claim.name, claim.value));
                }
            }
            Err(e) => self.status(&format!("Error parsing token: {e}")),
        }
    }

    /// Validate the token, then (re)open both hubs and load conversations.
    async fn initialize_hubs(&self) -> bool {
        self.status("Initializing hub connections...");
        if !self.auth.validate_token().await {
            self.status("Token validation failed. Please check your token.");
            self.sink.alert(
                AlertLevel::Error,
                "Authentication Error",
                "The provided token could not be validated. Please check that it is correct and not expired.",
            );
            return false;
        }

        self.stop_channels().await;
        self.connect_chat().await;
        self.connect_notifications().await;

        if self.chat.read().await.is_some() {
            self.refresh_conversations().await;
        }
        true
    }

    async fn connect_chat(&self) {
        let Some(channel) = self.build_channel(&self.config.chat_hub) else {
            self.status("Failed to connect to chat hub");
            return;
        };
        let identity = self.identity.read().await.clone();
        let session = SessionClient::new(
            Arc::clone(&channel),
            identity,
            self.status_callback(),
            self.config.rejoin_on_reconnect,
        );
        session.set_message_callback(self.message_callback());

        if self.announce_start(channel.url(), session.start()).await {
            *self.chat.write().await = Some(session);
            self.status("Chat hub connection initialized and ready");
        } else {
            self.status("Failed to connect to chat hub");
        }
    }

    async fn connect_notifications(&self) {
        let Some(channel) = self.build_channel(&self.config.notification_hub) else {
            self.status("Failed to connect to notification hub");
            return;
        };

        let sink = Arc::clone(&self.sink);
        subscribe::<String, _>(channel.as_ref(), "Connected", move |text| {
            sink.status(&format!("Notification Hub: {text}"));
        });
        let sink = Arc::clone(&self.sink);
        subscribe::<Notification, _>(channel.as_ref(), "ReceiveNotification", move |notification| {
            sink.status(&format!("Notification: {}", notification.text));
            sink.notification(&notification);
        });

        let report = |line: &str| self.status(line);
        let started = start_channel(channel.as_ref(), &report);
        if self.announce_start(channel.url(), started).await {
            *self.notification.write().await = Some(channel);
            self.status("Notification hub connection initialized and ready");
        } else {
            self.status("Failed to connect to notification hub");
        }
    }

    fn build_channel(&self, hub: &str) -> Option<Arc<dyn HubChannel>> {
        self.status(&format!("Creating connection to {hub}..."));
        match self.factory.build(hub, self.auth.credential()) {
            Ok(channel) => Some(channel),
            Err(e) => {
                report_connect_failure(hub, &e, &|line: &str| self.status(line));
                None
            }
        }
    }

    /// Bracket a hub start with its `Starting connection` and `Connected`
    /// lines; failures are reported by `start` itself.
    async fn announce_start(&self, url: &str, start: impl Future<Output = bool>) -> bool {
        self.status(&format!("Starting connection to {url}..."));
        let started = start.await;
        if started {
            self.status(&format!("Connected to {url}"));
        }
        started
    }

    // =========================================================================
    // Conversations and messages
    // =========================================================================

    /// Reload the conversation list, replacing the snapshot.
    pub async fn refresh_conversations(&self) -> bool {
        match self.api.conversations().await {
            Ok(list) => {
                *self
                    .snapshot
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = list.clone();
                self.sink.conversations(&list);
                self.status("Conversations loaded");
                true
            }
            Err(ApiError::Status { status, .. }) => {
                self.status(&format!("Error loading conversations: {status}"));
                false
            }
            Err(e) => {
                self.status(&format!("Error loading conversations: {e}"));
                self.sink
                    .alert(AlertLevel::Error, "Error", &format!("Error loading conversations: {e}"));
                false
            }
        }
    }

    /// Current snapshot, in selection order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn selected(&self) -> Option<Uuid> {
        *self.selected.read().await
    }

    /// Select the `index`-th conversation of the latest snapshot, join it and
    /// load its history.
    pub async fn select_conversation(&self, index: usize) -> bool {
        let Some(conversation_id) = self.conversations().get(index).map(|c| c.id) else {
            self.sink.alert(
                AlertLevel::Warning,
                "Invalid selection",
                &format!("No conversation at position {index}"),
            );
            return false;
        };
        *self.selected.write().await = Some(conversation_id);

        let chat = self.chat.read().await.clone();
        let Some(chat) = chat else {
            self.status("Chat hub client not initialized. Reconnecting...");
            self.initialize_hubs().await;
            return false;
        };

        if chat.join_conversation(conversation_id).await {
            self.load_messages(conversation_id).await
        } else {
            self.sink.alert(
                AlertLevel::Error,
                "Error",
                &format!("Failed to join conversation: {conversation_id}"),
            );
            false
        }
    }

    /// Replace the transcript with the conversation's history.
    pub async fn load_messages(&self, conversation_id: Uuid) -> bool {
        match self.api.messages(conversation_id).await {
            Ok((page, route)) => {
                let snapshot = self.conversations();
                self.sink.clear_chat();
                for message in &page.messages {
                    self.sink.chat_line(&format_message(message, &snapshot));
                }
                let suffix = match route {
                    ApiRoute::Primary => "",
                    ApiRoute::Legacy => " from alternative endpoint",
                };
                self.status(&format!("Loaded {} messages{suffix}", page.messages.len()));
                true
            }
            Err(ApiError::Status { status, .. }) => {
                self.status(&format!("Error loading messages: {status}"));
                false
            }
            Err(e) => {
                self.status(&format!("Error loading messages: {e}"));
                self.sink
                    .alert(AlertLevel::Error, "Error", &format!("Error loading messages: {e}"));
                false
            }
        }
    }

    /// Send to the selected conversation: live channel first, REST after.
    pub async fn send_message(&self, content: &str) -> bool {
        let Some(conversation_id) = self.selected().await else {
            self.sink.alert(
                AlertLevel::Warning,
                "No conversation",
                "Please select a conversation first.",
            );
            return false;
        };
        if content.trim().is_empty() {
            return false;
        }

        let chat = self.chat.read().await.clone();
        if let Some(chat) = &chat {
            if chat.state() != HubState::Connected {
                self.status("Chat hub not connected. Reconnecting...");
            }
            if chat.send(conversation_id, content).await {
                return true;
            }
        }

        let body = SendMessageRequest::text(content);
        match self.api.post_message(conversation_id, &body).await {
            Ok(route) => {
                info!(%conversation_id, ?route, "message sent over REST");
                self.status("Message sent via REST API");
                true
            }
            Err(ApiError::Status { status, .. }) => {
                self.status(&format!("Error sending message: {status}"));
                false
            }
            Err(e) => {
                self.status(&format!("Error sending message: {e}"));
                self.sink
                    .alert(AlertLevel::Error, "Error", &format!("Error sending message: {e}"));
                false
            }
        }
    }

    // =========================================================================
    // Diagnostics and creation
    // =========================================================================

    /// Check the service status endpoint and restart hubs that are down.
    pub async fn test_connection(&self) {
        self.status("Testing API connection...");
        match self.api.service_status().await {
            Ok(body) => self.status(&format!("API Connection successful: {body}")),
            Err(ApiError::Status { status, .. }) => {
                self.status(&format!("API Connection failed: {status}"))
            }
            Err(e) => {
                self.status(&format!("Connection test failed: {e}"));
                self.sink
                    .alert(AlertLevel::Error, "Error", &format!("Connection test failed: {e}"));
            }
        }

        let chat = self.chat.read().await.clone();
        if let Some(chat) = chat {
            self.recheck_hub("Chat Hub", chat.channel().as_ref()).await;
        }
        let notification = self.notification.read().await.clone();
        if let Some(channel) = notification {
            self.recheck_hub("Notification Hub", channel.as_ref()).await;
        }
    }

    async fn recheck_hub(&self, label: &str, channel: &dyn HubChannel) {
        let state = channel.state();
        self.status(&format!("{label} State: {state}"));
        if state == HubState::Connected {
            return;
        }
        match channel.start().await {
            Ok(()) => self.status(&format!("Successfully reconnected to {label}")),
            Err(e) => self.status(&format!("Failed to reconnect to {label}: {}", render_error(&e))),
        }
    }

    /// Open a direct conversation with the user whose id is `raw_user_id`.
    pub async fn create_direct(&self, raw_user_id: &str) -> bool {
        let raw = raw_user_id.trim();
        if raw.is_empty() {
            self.sink.alert(
                AlertLevel::Warning,
                "Missing user ID",
                "Please enter a user ID for direct message",
            );
            return false;
        }
        let Ok(user_id) = Uuid::parse_str(raw) else {
            self.sink.alert(
                AlertLevel::Warning,
                "Invalid user ID",
                "Invalid user ID format. Please use a valid GUID.",
            );
            return false;
        };

        match self.api.create_direct(user_id).await {
            Ok(()) => {
                self.status(&format!("Direct conversation created with {user_id}"));
                self.refresh_conversations().await;
                true
            }
            Err(e) => {
                self.report_creation_error("Error creating direct message", &e);
                false
            }
        }
    }

    /// Create a group from a name and a comma-separated participant list.
    pub async fn create_group(&self, name: &str, participants: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            self.sink
                .alert(AlertLevel::Warning, "Missing name", "Please enter a group name");
            return false;
        }
        let request = CreateGroupRequest {
            name: name.to_string(),
            participant_ids: parse_participants(participants),
        };

        match self.api.create_group(&request).await {
            Ok(()) => {
                self.status(&format!("Group conversation created: {name}"));
                self.refresh_conversations().await;
                true
            }
            Err(e) => {
                self.report_creation_error("Error creating group", &e);
                false
            }
        }
    }

    fn report_creation_error(&self, prefix: &str, err: &ApiError) {
        let message = match err {
            ApiError::Status { status, body } if !body.is_empty() => {
                format!("{prefix}: {status}\n{body}")
            }
            ApiError::Status { status, .. } => format!("{prefix}: {status}"),
            other => format!("Error creating conversation: {other}"),
        };
        self.status(&message);
        self.sink.alert(AlertLevel::Error, "Error", &message);
    }

    // =========================================================================
    // State and shutdown
    // =========================================================================

    pub async fn chat_state(&self) -> Option<HubState> {
        self.chat.read().await.as_ref().map(|chat| chat.state())
    }

    pub async fn notification_state(&self) -> Option<HubState> {
        self.notification
            .read()
            .await
            .as_ref()
            .map(|channel| channel.state())
    }

    /// Stop both channels.
    pub async fn shutdown(&self) {
        self.stop_channels().await;
        info!("session shut down");
    }

    async fn stop_channels(&self) {
        if let Some(chat) = self.chat.write().await.take() {
            chat.stop().await;
        }
        if let Some(channel) = self.notification.write().await.take() {
            channel.stop().await;
        }
    }

    fn status(&self, line: &str) {
        self.sink.status(line);
    }

    fn status_callback(&self) -> StatusCallback {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |line: &str| sink.status(line))
    }

    fn message_callback(&self) -> MessageCallback {
        let sink = Arc::clone(&self.sink);
        let snapshot = Arc::clone(&self.snapshot);
        Arc::new(move |message: Message| {
            let line = {
                let conversations = snapshot.read().unwrap_or_else(PoisonError::into_inner);
                format_message(&message, &conversations)
            };
            sink.chat_line(&line);
        })
    }
}

/// Render one transcript line.
///
/// The sender's name is looked up across the members of every conversation
/// in `conversations`, falling back to the sender id.
pub fn format_message(message: &Message, conversations: &[Conversation]) -> String {
    if message.is_system() {
        return format!("[SYSTEM] {}", message.content);
    }
    let sender = conversations
        .iter()
        .flat_map(|c| c.users.iter())
        .find(|u| u.user_id == message.sender_id)
        .map(|u| u.name.clone())
        .unwrap_or_else(|| message.sender_id.to_string());
    format!(
        "[{}] {sender}: {}",
        message.date.format("%Y-%m-%d %H:%M:%S"),
        message.content
    )
}

/// Parse a comma-separated id list, skipping entries that are not UUIDs.
pub fn parse_participants(raw: &str) -> Vec<Uuid> {
    raw.split(',')
        .filter_map(|part| Uuid::parse_str(part.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests;
