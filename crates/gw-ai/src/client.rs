//! Unified generate/stream surface over the channel pool (spec §4.7).
//!
//! Retry loop classifies each failure before deciding how to react,
//! generalized from post-hoc pattern matching to pre-emptive,
//! provider-agnostic classification via `GatewayError::kind()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{BoxStream, StreamExt};
use gw_core::{ErrorKind, GatewayError};
use tokio::sync::Mutex;

use crate::channel::ChannelManager;
use crate::cost::{CostTracker, ModelPricing};
use crate::lease::Lease;
use crate::provider::{GenerateRequest, GenerateResponse, ProviderFactory, StreamChunk};
use crate::rate_limit::{RateLimitConfig, SlidingWindowLimiter};

pub struct ClientConfig {
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub default_token_estimate: u32,
    pub rate_limit: RateLimitConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay: Duration::from_millis(250),
            default_token_estimate: 1000,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

pub struct UnifiedClient {
    channels: Arc<ChannelManager>,
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
    limiters: Mutex<HashMap<String, SlidingWindowLimiter>>,
    cost: Arc<CostTracker>,
    pricing: HashMap<String, ModelPricing>,
    config: ClientConfig,
}

impl UnifiedClient {
    pub fn new(
        channels: Arc<ChannelManager>,
        cost: Arc<CostTracker>,
        factories: HashMap<String, Arc<dyn ProviderFactory>>,
        pricing: HashMap<String, ModelPricing>,
        config: ClientConfig,
    ) -> Self {
        Self {
            channels,
            factories,
            limiters: Mutex::new(HashMap::new()),
            cost,
            pricing,
            config,
        }
    }

    /// Select a channel and key, returning the lease plus the resolved
    /// secret. `None` from channel selection or key rotation is reported
    /// as an auth-shaped error since both mean "nothing usable right now".
    async fn acquire_lease(&self) -> Result<(Lease, String, gw_core::Channel), GatewayError> {
        let channel_id = self
            .channels
            .select(Utc::now())
            .await
            .ok_or_else(|| GatewayError::InvalidRequest("no eligible AI channel".to_string()))?;
        let key_index = self
            .channels
            .next_key_index(&channel_id)
            .await
            .ok_or_else(|| GatewayError::AuthError {
                channel: channel_id.clone(),
            })?;
        let channel = self
            .channels
            .get(&channel_id)
            .await
            .expect("selected channel exists");
        let key = ChannelManager::resolve_key(&channel.keys[key_index])?;
        Ok((
            Lease {
                channel_id,
                key_index,
            },
            key,
            channel,
        ))
    }

    async fn reserve_rate_limit(&self, channel_id: &str, token_estimate: u32) -> Result<(), GatewayError> {
        let mut limiters = self.limiters.lock().await;
        let limiter = limiters
            .entry(channel_id.to_string())
            .or_insert_with(|| SlidingWindowLimiter::new(self.config.rate_limit));
        limiter.try_reserve(Instant::now(), token_estimate, channel_id)
    }

    fn factory_for(&self, provider: &str) -> Result<Arc<dyn ProviderFactory>, GatewayError> {
        self.factories
            .get(provider)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidRequest(format!("no provider factory registered for '{provider}'")))
    }

    /// `handle_failure` applies the spec's retry reaction table: `auth`
    /// disables the key permanently; other retryable classes just rotate
    /// (handled by the next `acquire_lease` call) and sleep a backoff.
    async fn handle_failure(&self, lease: &Lease, error: &GatewayError, attempt: u32) {
        self.channels.record_key_error(&lease.channel_id, lease.key_index).await;
        if error.kind() == ErrorKind::Auth {
            self.channels.disable_key(&lease.channel_id, lease.key_index).await;
            return;
        }
        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.config.base_retry_delay * 2u32.pow(attempt.min(4)));
        tokio::time::sleep(delay).await;
    }

    /// Direct call to a named provider, bypassing selection/rate-limiting
    /// and retries — used by `AiManager::test_channel` to probe exactly
    /// the channel the caller named.
    pub async fn probe(&self, provider: &str, key: &str, request: &GenerateRequest) -> Result<GenerateResponse, GatewayError> {
        let factory = self.factory_for(provider)?;
        factory.generate(key, request).await
    }

    pub async fn generate(&self, request: GenerateRequest, deadline: Duration) -> Result<GenerateResponse, GatewayError> {
        let started = Instant::now();
        let mut last_error = GatewayError::InvalidRequest("no eligible AI channel".to_string());

        for attempt in 0..=self.config.max_retries {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                return Err(GatewayError::RequestTimeout(deadline));
            };

            let (lease, key, channel) = match self.acquire_lease().await {
                Ok(v) => v,
                Err(error) => return Err(error),
            };
            if let Err(error) = self.reserve_rate_limit(&lease.channel_id, request.token_estimate.unwrap_or(self.config.default_token_estimate)).await {
                // Rate limiting never waits (spec §5); surface immediately.
                return Err(error);
            }
            let factory = self.factory_for(&channel.provider)?;
            self.channels.record_key_usage(&lease.channel_id, lease.key_index).await;

            let mut request = request.clone();
            request.model = channel.model.clone();

            match tokio::time::timeout(remaining, factory.generate(&key, &request)).await {
                Ok(Ok(response)) => {
                    if let Some(pricing) = self.pricing.get(&channel.model) {
                        self.cost
                            .record(&channel.model, response.prompt_tokens, response.completion_tokens, *pricing)
                            .await;
                    }
                    return Ok(response);
                }
                Ok(Err(error)) => {
                    let retryable = error.retryable() || error.kind() == ErrorKind::Auth;
                    last_error = error;
                    if !retryable || attempt == self.config.max_retries {
                        return Err(last_error);
                    }
                    self.handle_failure(&lease, &last_error, attempt).await;
                }
                Err(_elapsed) => {
                    return Err(GatewayError::RequestTimeout(remaining));
                }
            }
        }

        Err(last_error)
    }

    /// Streams generation chunks. Before any chunk is emitted, a
    /// retryable error restarts the whole call on a fresh lease; once a
    /// chunk has reached the caller, a later error is surfaced as
    /// `StreamChunk::Error` and the stream ends (spec §4.7 "Streaming").
    pub async fn stream(self: Arc<Self>, request: GenerateRequest, deadline: Duration) -> BoxStream<'static, StreamChunk> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let started = Instant::now();

        tokio::spawn(async move {
            let mut emitted_any = false;

            for attempt in 0..=self.config.max_retries {
                let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                    let _ = tx.send(StreamChunk::Error("deadline exceeded".to_string()));
                    return;
                };

                let (lease, key, channel) = match self.acquire_lease().await {
                    Ok(v) => v,
                    Err(error) => {
                        let _ = tx.send(StreamChunk::Error(error.to_string()));
                        return;
                    }
                };
                let token_estimate = request.token_estimate.unwrap_or(self.config.default_token_estimate);
                if let Err(error) = self.reserve_rate_limit(&lease.channel_id, token_estimate).await {
                    let _ = tx.send(StreamChunk::Error(error.to_string()));
                    return;
                }
                let factory = match self.factory_for(&channel.provider) {
                    Ok(f) => f,
                    Err(error) => {
                        let _ = tx.send(StreamChunk::Error(error.to_string()));
                        return;
                    }
                };
                self.channels.record_key_usage(&lease.channel_id, lease.key_index).await;

                let mut request = request.clone();
                request.model = channel.model.clone();

                let provider_stream = match factory.stream(&key, &request).await {
                    Ok(s) => s,
                    Err(error) => {
                        if !emitted_any && error.retryable() && attempt < self.config.max_retries {
                            self.handle_failure(&lease, &error, attempt).await;
                            continue;
                        }
                        let _ = tx.send(StreamChunk::Error(error.to_string()));
                        return;
                    }
                };

                let mut provider_stream = std::pin::pin!(provider_stream);
                let mut restart = false;
                while let Some(item) = provider_stream.next().await {
                    match item {
                        Ok(StreamChunk::Finish) => {
                            let _ = tx.send(StreamChunk::Finish);
                            return;
                        }
                        Ok(chunk) => {
                            emitted_any = true;
                            if tx.send(chunk).is_err() {
                                return;
                            }
                        }
                        Err(error) => {
                            if !emitted_any && error.retryable() && attempt < self.config.max_retries {
                                self.handle_failure(&lease, &error, attempt).await;
                                restart = true;
                                break;
                            }
                            let _ = tx.send(StreamChunk::Error(error.to_string()));
                            return;
                        }
                    }
                }
                if restart {
                    continue;
                }
                // provider stream ended without an explicit finish marker.
                let _ = tx.send(StreamChunk::Finish);
                return;
            }
        });

        futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}
