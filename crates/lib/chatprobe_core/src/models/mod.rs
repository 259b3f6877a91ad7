//! Domain models exchanged with the chat service.
//!
//! These mirror the JSON shapes returned by the REST API and pushed over the
//! hubs. Response types tolerate both camelCase and PascalCase keys; request
//! DTOs are serialized in PascalCase because that is what the service's
//! REST endpoints were observed to accept.

pub mod chat;
pub mod timestamp;

pub use chat::{
    Conversation, ConversationUser, CreateGroupRequest, Message, MessagePage, MessageType,
    Notification, SendMessageRequest,
};
