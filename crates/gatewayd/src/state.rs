//! Composition root: owns one instance of every facade and wires them
//! together (spec §6's facade list, all fronted by `gw-registry`'s
//! `start_instance` adapter factory).

use std::sync::Arc;

use gw_ai::AiManager;
use gw_auth::AuthManager;
use gw_hooks::HookExecutor;
use gw_registry::{RuntimeContext, ServiceRegistry};
use gw_router::Router;
use gw_supervisor::Supervisor;

use crate::config::GatewayConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<ServiceRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub router: Arc<Router>,
    pub ai: Arc<AiManager>,
    pub auth: Arc<AuthManager>,
    pub hooks: Arc<HookExecutor>,
    pub runtime: Arc<RuntimeContext>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let supervisor = Arc::new(Supervisor::new(config.handshake_timeout()));
        let registry = Arc::new(ServiceRegistry::new(supervisor.clone()));
        let router = Arc::new(Router::new(registry.clone(), supervisor.clone(), gw_router::RouterConfig::default()));

        let channels = Arc::new(gw_ai::ChannelManager::new());
        let cost = Arc::new(gw_ai::CostTracker::new(None));
        let factories = gw_ai::default_factories(&std::collections::HashMap::new());
        let client = Arc::new(gw_ai::UnifiedClient::new(
            channels.clone(),
            cost.clone(),
            factories,
            std::collections::HashMap::new(),
            gw_ai::ClientConfig::default(),
        ));
        let ai = Arc::new(AiManager::new(channels, cost, client));

        let auth = Arc::new(AuthManager::new(config.auth_mode));
        let hooks = Arc::new(HookExecutor::new());

        Self {
            config: Arc::new(config),
            registry,
            supervisor,
            router,
            ai,
            auth,
            hooks,
            runtime: Arc::new(RuntimeContext::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[tokio::test]
    async fn test_new_wires_every_facade_with_no_templates_or_instances() {
        let state = AppState::new(GatewayConfig::default());
        assert!(state.registry.template_names().await.is_empty());
        assert!(state.supervisor.list_instances().await.is_empty());
        assert!(state.ai.list_channels().await.is_empty());
        assert!(state.auth.list_tokens().await.is_empty());
    }
}
