//! AI channel manager & unified client (spec §4.7): one generate/stream
//! surface over many provider back ends, with credential pooling,
//! selection, retries, cost tracking, and rate limiting.

pub mod channel;
pub mod classify;
pub mod client;
pub mod cost;
pub mod lease;
pub mod provider;
pub mod rate_limit;

use std::collections::HashMap;
use std::sync::Arc;

use gw_core::{Channel, GatewayError, UsageStats};

pub use channel::ChannelManager;
pub use client::{ClientConfig, UnifiedClient};
pub use cost::{CostTracker, ModelPricing};
pub use lease::Lease;
pub use provider::{GenerateRequest, GenerateResponse, Message, ProviderFactory, StreamChunk};
pub use rate_limit::RateLimitConfig;

/// Admin facade over the channel pool and cost tracker (spec §6: "an AI
/// facade — list channels, enable/disable channel, test channel, usage
/// stats"). The generate/stream surface itself lives on `UnifiedClient`,
/// constructed once with the provider factories the deployment needs.
pub struct AiManager {
    channels: Arc<ChannelManager>,
    cost: Arc<CostTracker>,
    client: Arc<UnifiedClient>,
}

impl AiManager {
    pub fn new(channels: Arc<ChannelManager>, cost: Arc<CostTracker>, client: Arc<UnifiedClient>) -> Self {
        Self { channels, cost, client }
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.channels.list().await
    }

    pub async fn set_channel_enabled(&self, id: &str, enabled: bool) -> Result<(), GatewayError> {
        self.channels.set_enabled(id, enabled).await
    }

    /// A minimal generate call against `id` used to confirm a channel is
    /// reachable, bypassing the selector so the caller tests exactly the
    /// channel they named.
    pub async fn test_channel(&self, id: &str) -> Result<GenerateResponse, GatewayError> {
        let channel = self
            .channels
            .get(id)
            .await
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown channel '{id}'")))?;
        let key_index = self
            .channels
            .next_key_index(id)
            .await
            .ok_or_else(|| GatewayError::AuthError { channel: id.to_string() })?;
        let key = ChannelManager::resolve_key(&channel.keys[key_index])?;
        let request = GenerateRequest {
            model: channel.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "ping".to_string(),
            }],
            max_tokens: Some(1),
            tools: None,
            token_estimate: Some(1),
        };
        self.client.probe(&channel.provider, &key, &request).await
    }

    pub async fn usage_stats(&self) -> UsageStats {
        self.cost.snapshot().await
    }
}

/// Build the default provider registry (`openai`, `anthropic`) from a
/// base-url override table, falling back to each provider's public API.
pub fn default_factories(base_url_overrides: &HashMap<String, String>) -> HashMap<String, Arc<dyn ProviderFactory>> {
    let openai_url = base_url_overrides
        .get("openai")
        .cloned()
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
    let anthropic_url = base_url_overrides
        .get("anthropic")
        .cloned()
        .unwrap_or_else(|| "https://api.anthropic.com".to_string());

    let mut factories: HashMap<String, Arc<dyn ProviderFactory>> = HashMap::new();
    factories.insert("openai".to_string(), Arc::new(provider::OpenAiFactory::new(openai_url)));
    factories.insert("anthropic".to_string(), Arc::new(provider::AnthropicFactory::new(anthropic_url)));
    factories
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::{Key, KeySource, RotationPolicy};

    fn channel() -> Channel {
        Channel {
            id: "c1".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            keys: vec![Key {
                index: 0,
                source: KeySource::Literal("sk-test".to_string()),
                enabled: true,
                error_count: 0,
                total_requests: 0,
            }],
            rotation: RotationPolicy::Polling,
            weight: 1,
            enabled: true,
            cooldown_until: None,
            current_key_index: 0,
        }
    }

    #[tokio::test]
    async fn test_list_and_enable_disable_channel() {
        let channels = Arc::new(ChannelManager::new());
        channels.register(channel()).await;
        let cost = Arc::new(CostTracker::new(None));
        let factories = default_factories(&HashMap::new());
        let client = Arc::new(UnifiedClient::new(
            channels.clone(),
            cost.clone(),
            factories,
            HashMap::new(),
            ClientConfig::default(),
        ));
        let manager = AiManager::new(channels, cost, client);

        assert_eq!(manager.list_channels().await.len(), 1);
        manager.set_channel_enabled("c1", false).await.unwrap();
        let listed = manager.list_channels().await;
        assert!(!listed[0].enabled);
    }

    #[tokio::test]
    async fn test_set_enabled_unknown_channel_errors() {
        let channels = Arc::new(ChannelManager::new());
        let cost = Arc::new(CostTracker::new(None));
        let factories = default_factories(&HashMap::new());
        let client = Arc::new(UnifiedClient::new(
            channels.clone(),
            cost.clone(),
            factories,
            HashMap::new(),
            ClientConfig::default(),
        ));
        let manager = AiManager::new(channels, cost, client);
        let result = manager.set_channel_enabled("missing", true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_usage_stats_starts_empty() {
        let channels = Arc::new(ChannelManager::new());
        let cost = Arc::new(CostTracker::new(Some(10.0)));
        let factories = default_factories(&HashMap::new());
        let client = Arc::new(UnifiedClient::new(
            channels.clone(),
            cost.clone(),
            factories,
            HashMap::new(),
            ClientConfig::default(),
        ));
        let manager = AiManager::new(channels, cost, client);
        let stats = manager.usage_stats().await;
        assert_eq!(stats.total_cost_usd, 0.0);
        assert_eq!(stats.budget_usd, Some(10.0));
    }
}
