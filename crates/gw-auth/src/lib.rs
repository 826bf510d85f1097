//! Authentication (spec §4.8): a small table-backed component fronting
//! the HTTP admin surface.

pub mod events;
pub mod mode;
pub mod peer;
pub mod token;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use gw_core::{GatewayError, Topic};
use tokio::sync::{broadcast, RwLock};

pub use events::AuthEvent;
pub use mode::AuthMode;
pub use token::{ApiKey, Token};

pub struct AuthManager {
    mode: AuthMode,
    tokens: RwLock<HashMap<String, Token>>,
    api_keys: RwLock<HashMap<String, ApiKey>>,
    events: Topic<AuthEvent>,
}

impl AuthManager {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            tokens: RwLock::new(HashMap::new()),
            api_keys: RwLock::new(HashMap::new()),
            events: Topic::default(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub async fn generate_token(&self, permissions: Vec<String>, ttl: Option<Duration>) -> Token {
        let now = Utc::now();
        let token = Token {
            id: ulid::Ulid::new().to_string(),
            value: token::fresh_opaque_value(),
            permissions,
            created_at: now,
            expires_at: ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| now + d),
        };
        self.tokens.write().await.insert(token.id.clone(), token.clone());
        self.events.publish(AuthEvent::TokenGenerated { id: token.id.clone() });
        token
    }

    pub async fn revoke_token(&self, id: &str) -> bool {
        let removed = self.tokens.write().await.remove(id).is_some();
        if removed {
            self.events.publish(AuthEvent::TokenRevoked { id: id.to_string() });
        }
        removed
    }

    pub async fn list_tokens(&self) -> Vec<Token> {
        self.purge_expired_tokens().await;
        self.tokens.read().await.values().cloned().collect()
    }

    pub async fn create_api_key(&self, permissions: Vec<String>) -> ApiKey {
        let key = ApiKey {
            id: ulid::Ulid::new().to_string(),
            value: token::fresh_opaque_value(),
            permissions,
            created_at: Utc::now(),
        };
        self.api_keys.write().await.insert(key.id.clone(), key.clone());
        self.events.publish(AuthEvent::ApiKeyCreated { id: key.id.clone() });
        key
    }

    pub async fn revoke_api_key(&self, id: &str) -> bool {
        let removed = self.api_keys.write().await.remove(id).is_some();
        if removed {
            self.events.publish(AuthEvent::ApiKeyRevoked { id: id.to_string() });
        }
        removed
    }

    pub async fn list_api_keys(&self) -> Vec<ApiKey> {
        self.api_keys.read().await.values().cloned().collect()
    }

    /// Drop expired tokens, lazily, the next time tokens are read or
    /// validated (spec §4.8 "Expired tokens are lazy-purged").
    async fn purge_expired_tokens(&self) {
        let now = Utc::now();
        self.tokens.write().await.retain(|_, t| !t.is_expired(now));
    }

    async fn token_grants(&self, presented: &str, required_permission: &str) -> bool {
        self.purge_expired_tokens().await;
        self.tokens
            .read()
            .await
            .values()
            .any(|t| t.value == presented && token::any_permission_matches(&t.permissions, required_permission))
    }

    async fn api_key_grants(&self, presented: &str, required_permission: &str) -> bool {
        self.api_keys
            .read()
            .await
            .values()
            .any(|k| k.value == presented && token::any_permission_matches(&k.permissions, required_permission))
    }

    /// Apply the configured mode (spec §4.8): `local-trusted` checks the
    /// peer address; `external-secure` checks a presented token/key;
    /// `dual` tries local-trusted first, then falls back.
    pub async fn authenticate(
        &self,
        peer_addr: Option<IpAddr>,
        presented: Option<&str>,
        required_permission: &str,
    ) -> Result<(), GatewayError> {
        let local_ok = peer_addr.is_some_and(peer::is_local_trusted_peer);
        let external_ok = match presented {
            Some(value) => {
                self.token_grants(value, required_permission).await
                    || self.api_key_grants(value, required_permission).await
            }
            None => false,
        };

        let granted = match self.mode {
            AuthMode::LocalTrusted => local_ok,
            AuthMode::ExternalSecure => external_ok,
            AuthMode::Dual => local_ok || external_ok,
        };

        if granted {
            Ok(())
        } else {
            Err(GatewayError::PolicyViolation(format!(
                "peer not authorized for '{required_permission}'"
            )))
        }
    }
}
