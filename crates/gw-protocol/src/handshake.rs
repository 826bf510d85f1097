//! Version negotiation and the `initialize`/`initialized` handshake
//! (spec §4.4).

use gw_core::GatewayError;

const METHOD_NOT_FOUND: i64 = -32601;

/// Pick the lexicographically greatest version common to `client` (latest
/// first) and `server`. Spec §4.4: "Version negotiation picks the
/// lexicographically greatest version common to client and server."
pub fn negotiate_version(client: &[&str], server: &[String]) -> Option<String> {
    client
        .iter()
        .filter(|v| server.iter().any(|s| s == *v))
        .max()
        .map(|v| v.to_string())
}

/// True if a JSON-RPC error object's `code` is `MethodNotFound`, the only
/// error the `tools/list` handshake probe tolerates (spec §4.4).
pub fn is_method_not_found(error: &serde_json::Value) -> bool {
    error.get("code").and_then(|c| c.as_i64()) == Some(METHOD_NOT_FOUND)
}

pub fn handshake_failed(reason: impl Into<String>) -> GatewayError {
    GatewayError::HandshakeFailed(reason.into())
}
