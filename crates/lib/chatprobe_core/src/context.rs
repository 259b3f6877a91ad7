//! Request context shared by every collaborator.
//!
//! Bundles the base URL, the credential, and one HTTP client whose default
//! headers carry `Authorization: Bearer <token>`. Collaborators receive it
//! explicitly; there is no process-wide client.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use url::Url;

use crate::auth::{AuthError, Credential};

/// Timeout applied to every REST request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RequestContext {
    base_url: Url,
    credential: Credential,
    http: reqwest::Client,
}

impl RequestContext {
    /// Build a context whose HTTP client authenticates every request.
    ///
    /// `base_url` should come from [`crate::config::parse_base_url`] so it
    /// ends with `/`.
    pub fn new(base_url: Url, credential: Credential) -> Result<Self, AuthError> {
        let mut headers = HeaderMap::new();
        if !credential.is_empty() {
            let mut value = bearer_value(&credential)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            credential,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Resolve a path relative to the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path.trim_start_matches('/'))
    }
}

/// `Bearer <token>` header value.
pub fn bearer_value(credential: &Credential) -> Result<HeaderValue, AuthError> {
    Ok(HeaderValue::from_str(&format!(
        "Bearer {}",
        credential.expose()
    ))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_base_url;

    #[test]
    fn endpoint_joins_under_base_path() {
        let ctx = RequestContext::new(
            parse_base_url("https://example.com/svc").unwrap(),
            Credential::new("t"),
        )
        .unwrap();
        assert_eq!(
            ctx.endpoint("/api/Chat/conversations").unwrap().as_str(),
            "https://example.com/svc/api/Chat/conversations"
        );
    }

    #[test]
    fn rejects_token_with_newline() {
        let result = RequestContext::new(
            parse_base_url("https://example.com").unwrap(),
            Credential::new("abc\ndef"),
        );
        assert!(matches!(result, Err(AuthError::InvalidHeader(_))));
    }
}
