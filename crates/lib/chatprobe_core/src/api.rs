//! REST client for the chat service.
//!
//! Message history and the send fallback each have a primary and a legacy
//! route; the legacy one is tried only when the primary answers with a
//! non-success status.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::models::{Conversation, CreateGroupRequest, MessagePage, SendMessageRequest};

/// REST API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{status}")]
    Status { status: StatusCode, body: String },

    #[error("Response parse error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Response body of a non-success status, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

/// Which of the two routes answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRoute {
    Primary,
    Legacy,
}

/// Typed wrapper over the chat service's REST endpoints.
#[derive(Debug, Clone)]
pub struct ChatApi {
    ctx: RequestContext,
}

impl ChatApi {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx }
    }

    /// `GET api/WebSocketStatus`, returning the raw status body.
    pub async fn service_status(&self) -> Result<String, ApiError> {
        let resp = self.get("api/WebSocketStatus").await?;
        Ok(checked(resp).await?.text().await?)
    }

    /// `GET api/Chat/conversations`.
    pub async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let resp = self.get("api/Chat/conversations").await?;
        decode(checked(resp).await?).await
    }

    /// Message history, trying the legacy route when the primary refuses.
    pub async fn messages(&self, conversation_id: Uuid) -> Result<(MessagePage, ApiRoute), ApiError> {
        let primary = self
            .get(&format!("api/Chat/conversations/{conversation_id}/messages"))
            .await?;
        if primary.status().is_success() {
            return Ok((decode(primary).await?, ApiRoute::Primary));
        }
        debug!(status = %primary.status(), %conversation_id, "primary message route refused, trying legacy");
        let legacy = self
            .get(&format!("api/conversations/{conversation_id}/messages"))
            .await?;
        Ok((decode(checked(legacy).await?).await?, ApiRoute::Legacy))
    }

    /// Post a message over REST, trying the legacy route when the primary refuses.
    pub async fn post_message(
        &self,
        conversation_id: Uuid,
        body: &SendMessageRequest,
    ) -> Result<ApiRoute, ApiError> {
        let primary = self
            .post_json(&format!("api/Chat/conversations/{conversation_id}/messages"), body)
            .await?;
        if primary.status().is_success() {
            return Ok(ApiRoute::Primary);
        }
        debug!(status = %primary.status(), %conversation_id, "primary send route refused, trying legacy");
        let legacy = self
            .post_json(&format!("api/conversations/{conversation_id}/messages"), body)
            .await?;
        checked(legacy).await?;
        Ok(ApiRoute::Legacy)
    }

    /// Open (or create) a direct conversation with `user_id`.
    pub async fn create_direct(&self, user_id: Uuid) -> Result<(), ApiError> {
        let url = self.ctx.endpoint(&format!("api/Chat/conversations/direct/{user_id}"))?;
        let resp = self.ctx.http().post(url).send().await?;
        checked(resp).await?;
        info!(%user_id, "direct conversation created");
        Ok(())
    }

    /// Create a group conversation.
    pub async fn create_group(&self, request: &CreateGroupRequest) -> Result<(), ApiError> {
        let resp = self.post_json("api/Chat/conversations/group", request).await?;
        checked(resp).await?;
        info!(name = %request.name, participants = request.participant_ids.len(), "group conversation created");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Response, ApiError> {
        let url = self.ctx.endpoint(path)?;
        Ok(self.ctx.http().get(url).send().await?)
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        let url = self.ctx.endpoint(path)?;
        Ok(self.ctx.http().post(url).json(body).send().await?)
    }
}

/// Turn a non-success response into [`ApiError::Status`], keeping the body.
async fn checked(resp: Response) -> Result<Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}
