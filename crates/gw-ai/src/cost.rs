//! Cost tracking (spec §4.7 "Cost tracking"). The tracker only records and
//! reports; enforcement against a budget is the selector's job via
//! `ChannelManager::set_enabled`.

use gw_core::{ModelUsage, UsageStats};
use tokio::sync::Mutex;

/// Per-model USD pricing, per 1000 tokens. Providers vary wildly; callers
/// supply their own table rather than this crate hardcoding prices that
/// go stale.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

pub struct CostTracker {
    stats: Mutex<UsageStats>,
}

impl CostTracker {
    pub fn new(budget_usd: Option<f64>) -> Self {
        Self {
            stats: Mutex::new(UsageStats {
                budget_usd,
                window_started_at: Some(chrono::Utc::now()),
                ..Default::default()
            }),
        }
    }

    pub async fn record(&self, model: &str, prompt_tokens: u64, completion_tokens: u64, pricing: ModelPricing) {
        let cost = (prompt_tokens as f64 / 1000.0) * pricing.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * pricing.completion_per_1k;

        let mut stats = self.stats.lock().await;
        let entry = stats.per_model.entry(model.to_string()).or_insert_with(ModelUsage::default);
        entry.prompt_tokens += prompt_tokens;
        entry.completion_tokens += completion_tokens;
        entry.requests += 1;
        entry.cost_usd += cost;
        stats.total_cost_usd += cost;
    }

    pub async fn snapshot(&self) -> UsageStats {
        self.stats.lock().await.clone()
    }

    /// Whether total spend in the current window has reached the budget,
    /// if one was configured.
    pub async fn budget_exhausted(&self) -> bool {
        let stats = self.stats.lock().await;
        match stats.budget_usd {
            Some(budget) => stats.total_cost_usd >= budget,
            None => false,
        }
    }

    /// Reset counters and start a new window, keeping the configured
    /// budget.
    pub async fn reset_window(&self) {
        let mut stats = self.stats.lock().await;
        let budget_usd = stats.budget_usd;
        *stats = UsageStats {
            budget_usd,
            window_started_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICING: ModelPricing = ModelPricing {
        prompt_per_1k: 0.01,
        completion_per_1k: 0.03,
    };

    #[tokio::test]
    async fn test_record_accumulates_per_model_and_total() {
        let tracker = CostTracker::new(None);
        tracker.record("gpt-4o", 1000, 500, PRICING).await;
        tracker.record("gpt-4o", 2000, 1000, PRICING).await;
        let stats = tracker.snapshot().await;
        let usage = stats.per_model.get("gpt-4o").unwrap();
        assert_eq!(usage.prompt_tokens, 3000);
        assert_eq!(usage.requests, 2);
        assert!((stats.total_cost_usd - usage.cost_usd).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_exhausted_without_budget_is_false() {
        let tracker = CostTracker::new(None);
        tracker.record("gpt-4o", 1_000_000, 1_000_000, PRICING).await;
        assert!(!tracker.budget_exhausted().await);
    }

    #[tokio::test]
    async fn test_budget_exhausted_trips_when_over() {
        let tracker = CostTracker::new(Some(1.0));
        tracker.record("gpt-4o", 50_000, 0, PRICING).await;
        assert!(tracker.budget_exhausted().await);
    }

    #[tokio::test]
    async fn test_reset_window_clears_counters_keeps_budget() {
        let tracker = CostTracker::new(Some(5.0));
        tracker.record("gpt-4o", 1000, 0, PRICING).await;
        tracker.reset_window().await;
        let stats = tracker.snapshot().await;
        assert_eq!(stats.total_cost_usd, 0.0);
        assert_eq!(stats.budget_usd, Some(5.0));
    }
}
