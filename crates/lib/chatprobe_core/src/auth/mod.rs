//! Credential handling.
//!
//! Holds the bearer token, reads the identity out of its claim set, and
//! probes the service to check the token is accepted. Absent identities and
//! rejected tokens are ordinary outcomes (`Option` / `bool`), not errors.

pub mod claims;
pub mod inspect;

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::context::RequestContext;

pub use claims::{Claim, IDENTITY_CLAIMS};

/// Path of the lightweight "who am I" endpoint used to validate tokens.
pub const VALIDATION_PATH: &str = "api/User/GetMe";

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Invalid authorization header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Bearer token. Immutable once loaded; never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Load a token, trimming whitespace and an optional `Bearer ` prefix.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let token = trimmed
            .strip_prefix("Bearer ")
            .or_else(|| trimmed.strip_prefix("bearer "))
            .unwrap_or(trimmed)
            .trim();
        Self(token.to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

/// Subject identifier extracted from the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential context: the request context plus identity derived from its token.
#[derive(Debug, Clone)]
pub struct CredentialContext {
    ctx: RequestContext,
}

impl CredentialContext {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx }
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn credential(&self) -> &Credential {
        self.ctx.credential()
    }

    /// Identity from the token's claims, without network access.
    ///
    /// Malformed tokens and tokens lacking every recognized claim yield `None`.
    pub fn extract_identity(&self) -> Option<Identity> {
        match claims::decode_claims(self.credential().expose()) {
            Ok(map) => claims::identity_from_claims(&map),
            Err(e) => {
                debug!(error = %e, "token claims not readable");
                None
            }
        }
    }

    /// All claims in token order; empty for malformed tokens.
    pub fn claims(&self) -> Result<Vec<Claim>, AuthError> {
        claims::decode_claims(self.credential().expose()).map(|map| claims::flatten(&map))
    }

    /// Ask the service whether it accepts the token.
    ///
    /// Issues a single authenticated request; any failure is `false`.
    pub async fn validate_token(&self) -> bool {
        let url = match self.ctx.endpoint(VALIDATION_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build validation URL");
                return false;
            }
        };
        match self.ctx.http().get(url).send().await {
            Ok(resp) => {
                let ok = resp.status().is_success();
                debug!(status = %resp.status(), "token validation response");
                ok
            }
            Err(e) => {
                warn!(error = %e, "token validation request failed");
                false
            }
        }
    }
}
