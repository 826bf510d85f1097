//! Tokens and API keys: opaque high-entropy strings, `prefix*` permission
//! wildcards, lazy expiry purge on validation (spec §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub value: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub value: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// `prefix*` wildcard or exact match (spec §4.8 "Tokens and API keys").
pub fn permission_matches(granted: &str, requested: &str) -> bool {
    match granted.strip_suffix('*') {
        Some(prefix) => requested.starts_with(prefix),
        None => granted == requested,
    }
}

pub fn any_permission_matches(granted: &[String], requested: &str) -> bool {
    granted.iter().any(|g| permission_matches(g, requested))
}

/// A fresh opaque identifier, high-entropy enough not to be guessable
/// in sequence (two concatenated ULIDs rather than a sequential counter).
pub fn fresh_opaque_value() -> String {
    format!("{}{}", ulid::Ulid::new(), ulid::Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_permission_match() {
        assert!(permission_matches("templates:read", "templates:read"));
        assert!(!permission_matches("templates:read", "templates:write"));
    }

    #[test]
    fn test_prefix_wildcard_match() {
        assert!(permission_matches("templates:*", "templates:read"));
        assert!(permission_matches("templates:*", "templates:write"));
        assert!(!permission_matches("templates:*", "channels:read"));
    }

    #[test]
    fn test_any_permission_matches() {
        let granted = vec!["channels:read".to_string(), "templates:*".to_string()];
        assert!(any_permission_matches(&granted, "templates:write"));
        assert!(!any_permission_matches(&granted, "auth:revoke"));
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let token = Token {
            id: "t1".to_string(),
            value: "v".to_string(),
            permissions: vec![],
            created_at: now,
            expires_at: Some(now - chrono::Duration::seconds(1)),
        };
        assert!(token.is_expired(now));
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let token = Token {
            id: "t1".to_string(),
            value: "v".to_string(),
            permissions: vec![],
            created_at: Utc::now(),
            expires_at: None,
        };
        assert!(!token.is_expired(Utc::now() + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_fresh_opaque_values_are_unique() {
        assert_ne!(fresh_opaque_value(), fresh_opaque_value());
    }
}
