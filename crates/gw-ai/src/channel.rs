//! Channel pool: registration, key rotation, and weighted selection
//! (spec §4.7 "Channels" / "Selector").
//!
//! The selection cursor uses the smooth weighted round-robin scheme (each
//! eligible channel accrues its weight every tick; the highest accrual
//! wins and is discounted by the total) rather than a plain
//! `last_index + 1` rotation, since channels carry unequal weights; ties
//! fall back to id order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gw_core::{Channel, GatewayError, Key, KeySource, RotationPolicy};
use tokio::sync::Mutex;

pub struct ChannelManager {
    channels: Mutex<Vec<Channel>>,
    accrued_weight: Mutex<HashMap<String, i64>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            accrued_weight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, channel: Channel) {
        let mut channels = self.channels.lock().await;
        if let Some(existing) = channels.iter_mut().find(|c| c.id == channel.id) {
            *existing = channel;
        } else {
            channels.push(channel);
        }
    }

    pub async fn list(&self) -> Vec<Channel> {
        self.channels.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Channel> {
        self.channels.lock().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), GatewayError> {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown channel '{id}'")))?;
        channel.enabled = enabled;
        Ok(())
    }

    /// Smooth weighted round-robin over channels whose cooldown has
    /// expired and weight is nonzero (spec §4.7 Selector default).
    pub async fn select(&self, now: DateTime<Utc>) -> Option<String> {
        let channels = self.channels.lock().await;
        let mut eligible: Vec<&Channel> = channels.iter().filter(|c| c.effective_weight(now) > 0).collect();
        if eligible.is_empty() {
            return None;
        }
        eligible.sort_by(|a, b| a.id.cmp(&b.id));

        let mut accrued = self.accrued_weight.lock().await;
        let total: i64 = eligible.iter().map(|c| c.effective_weight(now) as i64).sum();
        for c in &eligible {
            let entry = accrued.entry(c.id.clone()).or_insert(0);
            *entry += c.effective_weight(now) as i64;
        }
        let winner = eligible
            .iter()
            .max_by_key(|c| (accrued.get(&c.id).copied().unwrap_or(0), std::cmp::Reverse(c.id.clone())))
            .expect("non-empty");
        if let Some(entry) = accrued.get_mut(&winner.id) {
            *entry -= total;
        }
        Some(winner.id.clone())
    }

    /// Next key index for `channel_id` under its rotation policy, skipping
    /// disabled keys. `None` if every key is disabled.
    pub async fn next_key_index(&self, channel_id: &str) -> Option<usize> {
        let mut channels = self.channels.lock().await;
        let channel = channels.iter_mut().find(|c| c.id == channel_id)?;
        let enabled_indices: Vec<usize> = channel
            .keys
            .iter()
            .enumerate()
            .filter(|(_, k)| k.enabled)
            .map(|(i, _)| i)
            .collect();
        if enabled_indices.is_empty() {
            return None;
        }
        let chosen = match channel.rotation {
            RotationPolicy::Polling => {
                let next = enabled_indices
                    .iter()
                    .find(|&&i| i > channel.current_key_index)
                    .copied()
                    .unwrap_or(enabled_indices[0]);
                next
            }
            RotationPolicy::Random => {
                let pick = pseudo_pick(channel_id, channel.keys.len(), &enabled_indices);
                pick
            }
        };
        channel.current_key_index = chosen;
        Some(chosen)
    }

    pub async fn disable_key(&self, channel_id: &str, key_index: usize) {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.iter_mut().find(|c| c.id == channel_id) {
            if let Some(key) = channel.keys.get_mut(key_index) {
                key.enabled = false;
            }
        }
    }

    pub async fn record_key_usage(&self, channel_id: &str, key_index: usize) {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.iter_mut().find(|c| c.id == channel_id) {
            if let Some(key) = channel.keys.get_mut(key_index) {
                key.total_requests += 1;
            }
        }
    }

    pub async fn record_key_error(&self, channel_id: &str, key_index: usize) {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.iter_mut().find(|c| c.id == channel_id) {
            if let Some(key) = channel.keys.get_mut(key_index) {
                key.error_count += 1;
            }
        }
    }

    /// Resolve a key's secret value. `EnvRef` reads the process
    /// environment lazily so raw secrets never sit in the channel struct
    /// at rest.
    pub fn resolve_key(key: &Key) -> Result<String, GatewayError> {
        match &key.source {
            KeySource::Literal(value) => Ok(value.clone()),
            KeySource::EnvRef(name) => std::env::var(name)
                .map_err(|_| GatewayError::InvalidRequest(format!("key env var '{name}' is not set"))),
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic, dependency-free stand-in for `random` rotation: a
/// simple string hash over the channel id mixed with the key count, so
/// the choice varies between channels without pulling in a `rand` crate.
fn pseudo_pick(channel_id: &str, key_count: usize, enabled_indices: &[usize]) -> usize {
    let hash = channel_id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b as u64));
    let slot = (hash as usize + key_count) % enabled_indices.len();
    enabled_indices[slot]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str, weight: u32, enabled: bool) -> Channel {
        Channel {
            id: id.to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            keys: vec![
                Key {
                    index: 0,
                    source: KeySource::Literal("k0".to_string()),
                    enabled: true,
                    error_count: 0,
                    total_requests: 0,
                },
                Key {
                    index: 1,
                    source: KeySource::Literal("k1".to_string()),
                    enabled: true,
                    error_count: 0,
                    total_requests: 0,
                },
            ],
            rotation: RotationPolicy::Polling,
            weight,
            enabled,
            cooldown_until: None,
            current_key_index: 0,
        }
    }

    #[tokio::test]
    async fn test_disabled_channel_never_selected() {
        let manager = ChannelManager::new();
        manager.register(channel("a", 10, false)).await;
        manager.register(channel("b", 10, true)).await;
        for _ in 0..10 {
            assert_eq!(manager.select(Utc::now()).await, Some("b".to_string()));
        }
    }

    #[tokio::test]
    async fn test_weighted_selection_favors_higher_weight() {
        let manager = ChannelManager::new();
        manager.register(channel("light", 1, true)).await;
        manager.register(channel("heavy", 3, true)).await;
        let mut heavy_count = 0;
        for _ in 0..8 {
            if manager.select(Utc::now()).await.as_deref() == Some("heavy") {
                heavy_count += 1;
            }
        }
        assert!(heavy_count >= 5, "heavy channel should win the majority of picks, got {heavy_count}/8");
    }

    #[tokio::test]
    async fn test_polling_key_rotation_skips_disabled() {
        let manager = ChannelManager::new();
        manager.register(channel("a", 1, true)).await;
        manager.disable_key("a", 1).await;
        let first = manager.next_key_index("a").await;
        assert_eq!(first, Some(0));
    }

    #[tokio::test]
    async fn test_no_eligible_key_returns_none() {
        let manager = ChannelManager::new();
        manager.register(channel("a", 1, true)).await;
        manager.disable_key("a", 0).await;
        manager.disable_key("a", 1).await;
        assert_eq!(manager.next_key_index("a").await, None);
    }

    #[tokio::test]
    async fn test_resolve_key_literal() {
        let key = Key {
            index: 0,
            source: KeySource::Literal("secret".to_string()),
            enabled: true,
            error_count: 0,
            total_requests: 0,
        };
        assert_eq!(ChannelManager::resolve_key(&key).unwrap(), "secret");
    }
}
