//! Join strategies.
//!
//! Servers disagree on the argument shape of `JoinConversation`, so joining
//! walks an ordered list of shapes and stops at the first one accepted.

use std::fmt;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::Identity;

/// Hub method used for joining a conversation.
pub const JOIN_METHOD: &str = "JoinConversation";

/// One argument shape for `JoinConversation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStrategy {
    /// `JoinConversation(<uuid>)`
    Typed(Uuid),
    /// `JoinConversation("<uuid string>")`
    Text(Uuid),
    /// `JoinConversation("<identity>", "<uuid string>")`
    WithIdentity { identity: Identity, conversation: Uuid },
}

impl JoinStrategy {
    /// Strategies in evaluation order; the identity form is left out when
    /// there is no identity.
    pub fn plan(conversation: Uuid, identity: Option<&Identity>) -> Vec<Self> {
        let mut plan = vec![Self::Typed(conversation), Self::Text(conversation)];
        if let Some(identity) = identity {
            plan.push(Self::WithIdentity {
                identity: identity.clone(),
                conversation,
            });
        }
        plan
    }

    /// 1-based position in the full strategy list.
    pub fn ordinal(&self) -> usize {
        match self {
            Self::Typed(_) => 1,
            Self::Text(_) => 2,
            Self::WithIdentity { .. } => 3,
        }
    }

    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::Typed(id) => vec![json!(id)],
            Self::Text(id) => vec![Value::String(id.to_string())],
            Self::WithIdentity {
                identity,
                conversation,
            } => vec![
                Value::String(identity.as_str().to_string()),
                Value::String(conversation.to_string()),
            ],
        }
    }

    /// Status suffix used when this strategy succeeds.
    pub fn success_label(&self) -> &'static str {
        match self {
            Self::Typed(_) => "",
            Self::Text(_) => " (string approach)",
            Self::WithIdentity { .. } => " (with user ID)",
        }
    }
}

/// Every attempted strategy failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinFailure {
    causes: Vec<(usize, String)>,
}

impl JoinFailure {
    pub fn push(&mut self, ordinal: usize, cause: impl Into<String>) {
        self.causes.push((ordinal, cause.into()));
    }

    pub fn causes(&self) -> &[(usize, String)] {
        &self.causes
    }

    pub fn attempts(&self) -> usize {
        self.causes.len()
    }
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("All join approaches failed")?;
        for (i, (ordinal, cause)) in self.causes.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}approach {ordinal}: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinFailure {}
