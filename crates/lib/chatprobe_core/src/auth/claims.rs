//! JWT claim decoding.
//!
//! Tokens are read without signature verification: the client only needs the
//! claim set for display and for the user id it passes to the hub.

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde_json::{Map, Value};

use super::{AuthError, Identity};

/// Claims that carry the user id, in preference order.
pub const IDENTITY_CLAIMS: [&str; 4] = [
    "nameid",
    "nameidentifier",
    "sub",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
];

/// One claim with its value rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub name: String,
    pub value: String,
}

/// Decode the payload of a JWT into its raw claim map.
pub fn decode_claims(token: &str) -> Result<Map<String, Value>, AuthError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::TokenError(format!("jwt decode: {e}")))
}

/// First present, non-empty identity claim.
pub fn identity_from_claims(claims: &Map<String, Value>) -> Option<Identity> {
    IDENTITY_CLAIMS
        .iter()
        .filter_map(|name| claims.get(*name))
        .find_map(claim_text)
        .map(Identity::new)
}

fn claim_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(claim_text),
        _ => None,
    }
}

/// Flatten a claim map to one entry per value; arrays expand to repeated claims.
pub fn flatten(claims: &Map<String, Value>) -> Vec<Claim> {
    let mut out = Vec::with_capacity(claims.len());
    for (name, value) in claims {
        match value {
            Value::Array(items) => {
                for item in items {
                    out.push(Claim {
                        name: name.clone(),
                        value: render(item),
                    });
                }
            }
            other => out.push(Claim {
                name: name.clone(),
                value: render(other),
            }),
        }
    }
    out
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_tokens::token;
    use super::*;
    use serde_json::json;

    fn identity(raw: &str) -> Option<Identity> {
        decode_claims(raw)
            .ok()
            .and_then(|claims| identity_from_claims(&claims))
    }

    #[test]
    fn primary_claim_wins_over_fallbacks() {
        let raw = token(json!({
            "sub": "subject-id",
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": "uri-id",
            "nameid": "primary-id",
        }));
        assert_eq!(identity(&raw), Some(Identity::new("primary-id")));
    }

    #[test]
    fn falls_back_to_sub() {
        let raw = token(json!({"sub": "subject-id", "email": "a@b.c"}));
        assert_eq!(identity(&raw), Some(Identity::new("subject-id")));
    }

    #[test]
    fn falls_back_to_identifier_uri() {
        let raw = token(json!({
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": "uri-id"
        }));
        assert_eq!(identity(&raw), Some(Identity::new("uri-id")));
    }

    #[test]
    fn empty_primary_claim_is_skipped() {
        let raw = token(json!({"nameid": "", "sub": "subject-id"}));
        assert_eq!(identity(&raw), Some(Identity::new("subject-id")));
    }

    #[test]
    fn numeric_and_array_claims_are_rendered() {
        let raw = token(json!({"nameid": 42}));
        assert_eq!(identity(&raw), Some(Identity::new("42")));
        let raw = token(json!({"nameid": ["first", "second"]}));
        assert_eq!(identity(&raw), Some(Identity::new("first")));
    }

    #[test]
    fn missing_identity_claims_yield_none() {
        let raw = token(json!({"email": "a@b.c", "role": "user"}));
        assert_eq!(identity(&raw), None);
    }

    #[test]
    fn malformed_tokens_yield_none() {
        for raw in ["", "not-a-jwt", "a.b.c", "....", "eyJhbGciOiJIUzI1NiJ9.@@@.sig"] {
            assert_eq!(identity(raw), None, "token {raw:?}");
        }
    }

    #[test]
    fn audience_does_not_block_decoding() {
        let raw = token(json!({"aud": "chat-api", "exp": 1, "nameid": "u1"}));
        assert_eq!(identity(&raw), Some(Identity::new("u1")));
    }

    #[test]
    fn flatten_expands_arrays() {
        let raw = token(json!({"role": ["a", "b"], "nameid": "u1"}));
        let claims = flatten(&decode_claims(&raw).unwrap());
        let roles: Vec<_> = claims.iter().filter(|c| c.name == "role").collect();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[1].value, "b");
    }
}
