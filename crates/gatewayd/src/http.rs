//! Minimal HTTP admin surface fronting the core's facades (spec §6): a
//! service-registry facade, a supervisor facade, a router facade, an AI
//! facade, an auth facade.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router as AxumRouter};
use gw_core::{GatewayError, ServiceTemplate};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(healthz))
        .route("/templates", get(list_templates).post(register_template))
        .route("/templates/{name}", delete(remove_template))
        .route("/instances", get(list_instances).post(start_instance))
        .route("/instances/{id}", get(get_instance))
        .route("/instances/{id}/stop", post(stop_instance))
        .route("/instances/{id}/restart", post(restart_instance))
        .route("/instances/{id}/metrics", get(instance_metrics))
        .route("/route", post(dispatch))
        .route("/channels", get(list_channels))
        .route("/channels/{id}/enable", post(enable_channel))
        .route("/channels/{id}/disable", post(disable_channel))
        .route("/channels/{id}/test", post(test_channel))
        .route("/usage", get(usage_stats))
        .route("/auth/tokens", get(list_tokens).post(create_token))
        .route("/auth/tokens/{id}", delete(revoke_token))
        .route("/auth/keys", get(list_keys).post(create_key))
        .route("/auth/keys/{id}", delete(revoke_key))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    /// Maps `ErrorKind` to an HTTP status; the body is `{kind, message,
    /// retryable, retry_after_ms}` — never the raw secret values the
    /// error's `Display` impl already omits (spec §7).
    fn into_response(self) -> Response {
        use gw_core::ErrorKind;
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Policy => StatusCode::FORBIDDEN,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Transport | ErrorKind::Network | ErrorKind::Server => StatusCode::BAD_GATEWAY,
            ErrorKind::Protocol | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            kind: format!("{kind:?}"),
            message: self.0.to_string(),
            retryable: self.0.retryable(),
            retry_after_ms: self.0.retry_after().map(|d| d.as_millis() as u64),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    retryable: bool,
    retry_after_ms: Option<u64>,
}

async fn require_permission(
    state: &AppState,
    peer: SocketAddr,
    headers: &HeaderMap,
    permission: &str,
) -> Result<(), ApiError> {
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    state
        .auth
        .authenticate(Some(peer.ip()), presented, permission)
        .await
        .map_err(ApiError::from)
}

// --- templates -------------------------------------------------------

async fn list_templates(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    require_permission(&state, peer, &headers, "templates:read").await?;
    Ok(Json(state.registry.template_names().await))
}

async fn register_template(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(template): Json<ServiceTemplate>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "templates:write").await?;
    state.registry.register(template).await?;
    Ok(StatusCode::CREATED)
}

async fn remove_template(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "templates:write").await?;
    match state.registry.unregister(&name).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError(GatewayError::InstanceNotFound(name))),
    }
}

// --- instances (supervisor facade) ------------------------------------

#[derive(Deserialize)]
struct StartInstanceRequest {
    template_name: String,
    #[serde(default)]
    client_versions: Vec<String>,
    #[serde(default)]
    client_capabilities: serde_json::Value,
}

async fn start_instance(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<StartInstanceRequest>,
) -> Result<Json<gw_core::ServiceInstance>, ApiError> {
    require_permission(&state, peer, &headers, "instances:write").await?;
    let versions: Vec<&str> = req.client_versions.iter().map(String::as_str).collect();
    let instance = state
        .registry
        .start_instance(&req.template_name, &versions, req.client_capabilities, &state.runtime)
        .await?;
    Ok(Json(instance))
}

async fn list_instances(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<gw_core::ServiceInstance>>, ApiError> {
    require_permission(&state, peer, &headers, "instances:read").await?;
    Ok(Json(state.supervisor.list_instances().await))
}

async fn get_instance(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<gw_core::ServiceInstance>, ApiError> {
    require_permission(&state, peer, &headers, "instances:read").await?;
    state
        .supervisor
        .get_process_info(&id)
        .await
        .map(Json)
        .ok_or(ApiError(GatewayError::InstanceNotFound(id)))
}

async fn stop_instance(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "instances:write").await?;
    state.supervisor.stop_process(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct RestartInstanceRequest {
    #[serde(default)]
    client_versions: Vec<String>,
    #[serde(default)]
    client_capabilities: serde_json::Value,
}

async fn restart_instance(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RestartInstanceRequest>>,
) -> Result<Json<gw_core::ServiceInstance>, ApiError> {
    require_permission(&state, peer, &headers, "instances:write").await?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let versions: Vec<&str> = req.client_versions.iter().map(String::as_str).collect();
    let instance = state
        .registry
        .restart_instance(&id, &versions, req.client_capabilities, &state.runtime)
        .await?;
    Ok(Json(instance))
}

async fn instance_metrics(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<gw_router::InstanceHealth>, ApiError> {
    require_permission(&state, peer, &headers, "instances:read").await?;
    state
        .router
        .health(&id)
        .await
        .map(Json)
        .ok_or(ApiError(GatewayError::InstanceNotFound(id)))
}

// --- router facade -----------------------------------------------------

#[derive(Deserialize)]
struct DispatchRequest {
    template_name: String,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default = "default_deadline_ms")]
    deadline_ms: u64,
}

fn default_deadline_ms() -> u64 {
    30_000
}

async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<DispatchRequest>,
) -> Result<Json<gw_core::McpMessage>, ApiError> {
    require_permission(&state, peer, &headers, "route:dispatch").await?;

    let pre = state
        .hooks
        .run_for_event(gw_hooks::LifecyclePoint::PreToolUse, &req.method, &req.params, &std::collections::HashMap::new())
        .await;
    if pre.iter().any(|r| r.decision == gw_hooks::HookDecision::Deny) {
        return Err(ApiError(GatewayError::PolicyViolation(format!(
            "a PreToolUse hook denied '{}'",
            req.method
        ))));
    }

    let result = state
        .router
        .route(&req.template_name, &req.method, req.params.clone(), Duration::from_millis(req.deadline_ms))
        .await;

    state
        .hooks
        .run_for_event(gw_hooks::LifecyclePoint::PostToolUse, &req.method, &req.params, &std::collections::HashMap::new())
        .await;

    Ok(Json(result?))
}

// --- AI facade -----------------------------------------------------------

async fn list_channels(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<gw_core::Channel>>, ApiError> {
    require_permission(&state, peer, &headers, "channels:read").await?;
    Ok(Json(state.ai.list_channels().await))
}

async fn enable_channel(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "channels:write").await?;
    state.ai.set_channel_enabled(&id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_channel(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "channels:write").await?;
    state.ai.set_channel_enabled(&id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_channel(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<gw_ai::GenerateResponse>, ApiError> {
    require_permission(&state, peer, &headers, "channels:write").await?;
    Ok(Json(state.ai.test_channel(&id).await?))
}

async fn usage_stats(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<gw_core::UsageStats>, ApiError> {
    require_permission(&state, peer, &headers, "usage:read").await?;
    Ok(Json(state.ai.usage_stats().await))
}

// --- auth facade ---------------------------------------------------------

#[derive(Deserialize)]
struct CreateTokenRequest {
    #[serde(default)]
    permissions: Vec<String>,
    ttl_secs: Option<u64>,
}

async fn create_token(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateTokenRequest>,
) -> Result<Json<gw_auth::Token>, ApiError> {
    require_permission(&state, peer, &headers, "auth:write").await?;
    let ttl = req.ttl_secs.map(Duration::from_secs);
    Ok(Json(state.auth.generate_token(req.permissions, ttl).await))
}

async fn revoke_token(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "auth:write").await?;
    if state.auth.revoke_token(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(GatewayError::InstanceNotFound(id)))
    }
}

async fn list_tokens(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<gw_auth::Token>>, ApiError> {
    require_permission(&state, peer, &headers, "auth:read").await?;
    Ok(Json(state.auth.list_tokens().await))
}

#[derive(Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    permissions: Vec<String>,
}

async fn create_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateKeyRequest>,
) -> Result<Json<gw_auth::ApiKey>, ApiError> {
    require_permission(&state, peer, &headers, "auth:write").await?;
    Ok(Json(state.auth.create_api_key(req.permissions).await))
}

async fn revoke_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, peer, &headers, "auth:write").await?;
    if state.auth.revoke_api_key(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(GatewayError::InstanceNotFound(id)))
    }
}

async fn list_keys(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<gw_auth::ApiKey>>, ApiError> {
    require_permission(&state, peer, &headers, "auth:read").await?;
    Ok(Json(state.auth.list_api_keys().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    async fn spawn_server(config: GatewayConfig) -> String {
        let state = AppState::new(config);
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_healthz_needs_no_auth() {
        let base = spawn_server(GatewayConfig::default()).await;
        let resp = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_local_trusted_peer_reaches_registry_facade() {
        let mut config = GatewayConfig::default();
        config.auth_mode = gw_auth::AuthMode::LocalTrusted;
        let base = spawn_server(config).await;
        let resp = reqwest::get(format!("{base}/templates")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let names: Vec<String> = resp.json().await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_external_secure_without_token_is_rejected() {
        let mut config = GatewayConfig::default();
        config.auth_mode = gw_auth::AuthMode::ExternalSecure;
        let base = spawn_server(config).await;
        let resp = reqwest::get(format!("{base}/templates")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_instance_lookup_is_not_found() {
        let base = spawn_server(GatewayConfig::default()).await;
        let resp = reqwest::get(format!("{base}/instances/does-not-exist")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_then_list_template() {
        let base = spawn_server(GatewayConfig::default()).await;
        let client = reqwest::Client::new();
        let template = serde_json::json!({
            "name": "fetch",
            "transport": "stdio",
            "command": "npx",
            "args": [],
            "env": {},
            "container": null,
            "description": null,
            "trust_level": "untrusted",
            "security": {},
            "timeouts": {},
            "working_dir": null,
            "url": null,
        });
        let resp = client
            .post(format!("{base}/templates"))
            .json(&template)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = client.get(format!("{base}/templates")).send().await.unwrap();
        let names: Vec<String> = resp.json().await.unwrap();
        assert_eq!(names, vec!["fetch".to_string()]);
    }
}
