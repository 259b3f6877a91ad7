//! Token inspection report.
//!
//! Summarizes issuer, audience, lifetime and claims, and checks the claims
//! the chat service relies on are present.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::claims::{self, Claim};

/// Claims accepted as the user id for the required-claims check.
const NAME_IDENTIFIER_CLAIMS: [&str; 2] = [
    "nameid",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
];

/// Claims accepted as the user name for the required-claims check.
const NAME_CLAIMS: [&str; 2] = [
    "unique_name",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name",
];

/// Result of inspecting a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenInspection {
    NoToken,
    InvalidFormat(String),
    Report(TokenReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenReport {
    pub algorithm: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub claims: Vec<Claim>,
    pub has_name_identifier: bool,
    pub has_name: bool,
}

/// Inspect `token` relative to `now`.
pub fn inspect_token(token: &str, now: DateTime<Utc>) -> TokenInspection {
    if token.trim().is_empty() {
        return TokenInspection::NoToken;
    }
    let header = match jsonwebtoken::decode_header(token) {
        Ok(header) => header,
        Err(e) => return TokenInspection::InvalidFormat(e.to_string()),
    };
    let map = match claims::decode_claims(token) {
        Ok(map) => map,
        Err(e) => return TokenInspection::InvalidFormat(e.to_string()),
    };

    let expires_at = map.get("exp").and_then(unix_time);
    let report = TokenReport {
        algorithm: format!("{:?}", header.alg),
        issuer: map.get("iss").and_then(Value::as_str).map(str::to_string),
        audience: map.get("aud").and_then(first_text),
        expired: expires_at.is_some_and(|exp| exp < now),
        expires_at,
        issued_at: map.get("iat").and_then(unix_time),
        has_name_identifier: NAME_IDENTIFIER_CLAIMS.iter().any(|c| map.contains_key(*c)),
        has_name: NAME_CLAIMS.iter().any(|c| map.contains_key(*c)),
        claims: claims::flatten(&map),
    };
    TokenInspection::Report(report)
}

fn unix_time(value: &Value) -> Option<DateTime<Utc>> {
    let secs = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(secs, 0)
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

fn presence(found: bool) -> &'static str {
    if found { "Present" } else { "MISSING" }
}

impl fmt::Display for TokenInspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoToken => writeln!(f, "No token provided"),
            Self::InvalidFormat(reason) => writeln!(f, "Invalid token format: {reason}"),
            Self::Report(report) => fmt::Display::fmt(report, f),
        }
    }
}

impl fmt::Display for TokenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Token Analysis:")?;
        writeln!(f, "Algorithm: {}", self.algorithm)?;
        writeln!(f, "Issuer: {}", self.issuer.as_deref().unwrap_or("None"))?;
        writeln!(f, "Audience: {}", self.audience.as_deref().unwrap_or("None"))?;
        match self.expires_at {
            Some(exp) => writeln!(
                f,
                "Expiration: {} ({})",
                exp.to_rfc3339(),
                if self.expired { "EXPIRED" } else { "Valid" }
            )?,
            None => writeln!(f, "Expiration: None")?,
        }
        match self.issued_at {
            Some(iat) => writeln!(f, "Issued At: {}", iat.to_rfc3339())?,
            None => writeln!(f, "Issued At: None")?,
        }
        writeln!(f)?;
        writeln!(f, "Claims:")?;
        for claim in &self.claims {
            writeln!(f, "- {}: {}", claim.name, claim.value)?;
        }
        writeln!(f)?;
        writeln!(f, "Required Claims Check:")?;
        writeln!(
            f,
            "- NameIdentifier (UserId): {}",
            presence(self.has_name_identifier)
        )?;
        writeln!(f, "- Name (Username): {}", presence(self.has_name))
    }
}
