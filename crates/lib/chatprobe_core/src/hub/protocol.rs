//! Hub JSON protocol framing.
//!
//! Every frame is a JSON object terminated by the ASCII record separator
//! (`0x1e`). A WebSocket text message may carry several frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::HubError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream items, cancel frames and anything newer; ignored by this client.
    Other(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: Option<String>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    result: Option<Value>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundInvocation<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    target: &'a str,
    arguments: &'a [Value],
}

#[derive(Deserialize)]
struct HandshakeResponse {
    error: Option<String>,
}

/// Client handshake selecting the JSON protocol.
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)
}

/// Check the server's handshake reply.
pub fn parse_handshake(frame: &str) -> Result<(), HubError> {
    let reply: HandshakeResponse = serde_json::from_str(frame)
        .map_err(|e| HubError::Handshake(format!("malformed handshake response: {e}")))?;
    match reply.error {
        Some(error) => Err(HubError::Handshake(error)),
        None => Ok(()),
    }
}

/// Split a text payload into frames, dropping empty trailing pieces.
pub fn split_frames(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|frame| !frame.trim().is_empty())
}

pub fn parse_message(frame: &str) -> Result<HubMessage, HubError> {
    let raw: RawMessage =
        serde_json::from_str(frame).map_err(|e| HubError::Protocol(e.to_string()))?;
    Ok(match raw.kind {
        INVOCATION => HubMessage::Invocation {
            invocation_id: raw.invocation_id,
            target: raw
                .target
                .ok_or_else(|| HubError::Protocol("invocation without target".into()))?,
            arguments: raw.arguments,
        },
        COMPLETION => HubMessage::Completion {
            invocation_id: raw
                .invocation_id
                .ok_or_else(|| HubError::Protocol("completion without invocationId".into()))?,
            result: raw.result,
            error: raw.error,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        other => HubMessage::Other(other),
    })
}

/// Encode an invocation; `invocation_id` is `None` for fire-and-forget sends.
pub fn invocation_frame(
    invocation_id: Option<&str>,
    target: &str,
    arguments: &[Value],
) -> Result<String, HubError> {
    let body = serde_json::to_string(&OutboundInvocation {
        kind: INVOCATION,
        invocation_id,
        target,
        arguments,
    })
    .map_err(|e| HubError::Protocol(e.to_string()))?;
    Ok(format!("{body}{RECORD_SEPARATOR}"))
}

pub fn ping_frame() -> String {
    format!(r#"{{"type":{PING}}}{RECORD_SEPARATOR}"#)
}
