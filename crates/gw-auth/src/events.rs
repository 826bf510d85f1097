//! Audit events emitted by the auth manager (spec §4.8).

#[derive(Debug, Clone)]
pub enum AuthEvent {
    TokenGenerated { id: String },
    TokenRevoked { id: String },
    ApiKeyCreated { id: String },
    ApiKeyRevoked { id: String },
}
