//! Conversation, message and notification models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::timestamp;

/// A chat room the user is a member of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "Id")]
    pub id: Uuid,
    #[serde(alias = "ConversationName", default)]
    pub conversation_name: String,
    #[serde(alias = "ChatStarted", deserialize_with = "timestamp::deserialize_opt", default)]
    pub chat_started: Option<DateTime<Utc>>,
    #[serde(alias = "Users", default)]
    pub users: Vec<ConversationUser>,
    #[serde(alias = "IsGroup", default)]
    pub is_group: bool,
}

/// Membership of one user in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUser {
    /// Membership row id.
    #[serde(alias = "Id")]
    pub id: Uuid,
    #[serde(alias = "UserId")]
    pub user_id: Uuid,
    #[serde(alias = "Name", default)]
    pub name: String,
    #[serde(alias = "JoinedDate", deserialize_with = "timestamp::deserialize_opt", default)]
    pub joined_date: Option<DateTime<Utc>>,
}

/// A chat message. Messages with a nil sender are authored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "id", alias = "Id")]
    pub id: Uuid,
    #[serde(rename = "senderID", alias = "senderId", alias = "SenderID", alias = "SenderId")]
    pub sender_id: Uuid,
    #[serde(
        rename = "recipientID",
        alias = "recipientId",
        alias = "RecipientID",
        alias = "RecipientId",
        default
    )]
    pub recipient_id: Option<Uuid>,
    /// Receive time when the server leaves it out.
    #[serde(
        rename = "date",
        alias = "Date",
        deserialize_with = "timestamp::deserialize_or_now",
        default = "Utc::now"
    )]
    pub date: DateTime<Utc>,
    #[serde(rename = "replyTo", alias = "ReplyTo", default)]
    pub reply_to: Option<Uuid>,
    #[serde(rename = "type", alias = "Type", default)]
    pub kind: MessageType,
    #[serde(rename = "content", alias = "Content", deserialize_with = "null_as_empty", default)]
    pub content: String,
}

impl Message {
    /// Whether the server (rather than a user) authored this message.
    pub fn is_system(&self) -> bool {
        self.sender_id.is_nil()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Message type tag, encoded on the wire as its numeric code.
///
/// Codes added by the server after this client was built decode as
/// [`MessageType::Unknown`]; a null or unrecognized name decodes as `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<MessageTypeRepr>", into = "i64")]
pub enum MessageType {
    AdminAction,
    Sticker,
    #[default]
    Text,
    Image,
    Comment,
    Post,
    Audio,
    Video,
    Unknown(i64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageTypeRepr {
    Code(i64),
    Name(String),
}

impl MessageType {
    pub fn code(self) -> i64 {
        match self {
            Self::AdminAction => 0,
            Self::Sticker => 1,
            Self::Text => 2,
            Self::Image => 3,
            Self::Comment => 4,
            Self::Post => 5,
            Self::Audio => 6,
            Self::Video => 7,
            Self::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::AdminAction,
            1 => Self::Sticker,
            2 => Self::Text,
            3 => Self::Image,
            4 => Self::Comment,
            5 => Self::Post,
            6 => Self::Audio,
            7 => Self::Video,
            _ => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        Some(match normalized.as_str() {
            "adminaction" => Self::AdminAction,
            "sticker" => Self::Sticker,
            "text" => Self::Text,
            "image" => Self::Image,
            "comment" => Self::Comment,
            "post" => Self::Post,
            "audio" => Self::Audio,
            "video" => Self::Video,
            _ => return None,
        })
    }
}

impl From<MessageType> for i64 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl From<Option<MessageTypeRepr>> for MessageType {
    fn from(repr: Option<MessageTypeRepr>) -> Self {
        match repr {
            Some(MessageTypeRepr::Code(code)) => {
                Self::from_code(code).unwrap_or(Self::Unknown(code))
            }
            Some(MessageTypeRepr::Name(name)) => Self::from_name(&name).unwrap_or_default(),
            None => Self::default(),
        }
    }
}

/// One page of a conversation's message history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    #[serde(alias = "Messages", default)]
    pub messages: Vec<Message>,
    #[serde(alias = "TotalPages", default)]
    pub total_pages: i32,
    #[serde(alias = "TotalCount", default)]
    pub total_count: i64,
    #[serde(alias = "CurrentPage", default)]
    pub current_page: i32,
    #[serde(alias = "PageSize", default)]
    pub page_size: i32,
}

/// A push notification from the notification hub.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "Id")]
    pub id: Uuid,
    #[serde(alias = "UserId", default)]
    pub user_id: Option<Uuid>,
    #[serde(alias = "Text", deserialize_with = "null_as_empty", default)]
    pub text: String,
    #[serde(alias = "Caption", default)]
    pub caption: Option<String>,
    #[serde(alias = "Url", default)]
    pub url: Option<String>,
    #[serde(alias = "TeleUrl", default)]
    pub tele_url: Option<String>,
    #[serde(alias = "AppUrl", default)]
    pub app_url: Option<String>,
    #[serde(rename = "type", alias = "Type", default)]
    pub kind: i32,
    #[serde(alias = "Date", deserialize_with = "timestamp::deserialize_opt", default)]
    pub date: Option<DateTime<Utc>>,
}

/// Body of the REST send fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "Type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<Uuid>,
}

impl SendMessageRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageType::Text,
            reply_to_message_id: None,
        }
    }
}

/// Body for creating a group conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub participant_ids: Vec<Uuid>,
}
