//! Sliding-window request/token limiter, per channel (spec §4.7).
//!
//! Pre-emptive: tokens are reserved before the provider is called, so the
//! client can fail fast with `RateLimited` rather than discover the limit
//! after spending a round trip, rather than relying on post-hoc detection
//! of a provider's own rate-limit response.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use gw_core::GatewayError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 1_000_000,
        }
    }
}

struct Reservation {
    at: Instant,
    tokens: u32,
}

/// One channel's sliding window. Not `Clone`; callers hold it behind a
/// lock alongside the channel's other mutable state.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    reservations: VecDeque<Reservation>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            reservations: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.reservations.front() {
            if now.duration_since(front.at) > WINDOW {
                self.reservations.pop_front();
            } else {
                break;
            }
        }
    }

    /// Reserve `token_estimate` tokens for one request, observed at `now`.
    /// Fails fast without sleeping — spec §5 "Rate-limit wait: never".
    pub fn try_reserve(&mut self, now: Instant, token_estimate: u32, channel_id: &str) -> Result<(), GatewayError> {
        self.prune(now);

        if self.reservations.len() as u32 >= self.config.requests_per_minute {
            return Err(self.rate_limited(channel_id));
        }
        let reserved_tokens: u32 = self.reservations.iter().map(|r| r.tokens).sum();
        if reserved_tokens + token_estimate > self.config.tokens_per_minute {
            return Err(self.rate_limited(channel_id));
        }

        self.reservations.push_back(Reservation {
            at: now,
            tokens: token_estimate,
        });
        Ok(())
    }

    fn rate_limited(&self, channel_id: &str) -> GatewayError {
        let retry_after = self
            .reservations
            .front()
            .map(|r| WINDOW.saturating_sub(Instant::now().duration_since(r.at)));
        GatewayError::RateLimited {
            channel: channel_id.to_string(),
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_within_limits_succeeds() {
        let mut limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests_per_minute: 5,
            tokens_per_minute: 1000,
        });
        for _ in 0..5 {
            assert!(limiter.try_reserve(Instant::now(), 10, "c1").is_ok());
        }
    }

    #[test]
    fn test_exceeding_request_count_fails_fast() {
        let mut limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests_per_minute: 2,
            tokens_per_minute: 1000,
        });
        let now = Instant::now();
        limiter.try_reserve(now, 1, "c1").unwrap();
        limiter.try_reserve(now, 1, "c1").unwrap();
        let result = limiter.try_reserve(now, 1, "c1");
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }

    #[test]
    fn test_exceeding_token_budget_fails_fast() {
        let mut limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests_per_minute: 100,
            tokens_per_minute: 100,
        });
        let now = Instant::now();
        limiter.try_reserve(now, 90, "c1").unwrap();
        let result = limiter.try_reserve(now, 50, "c1");
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }

    #[test]
    fn test_window_expiry_frees_capacity() {
        let mut limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            tokens_per_minute: 1000,
        });
        let now = Instant::now();
        limiter.try_reserve(now, 1, "c1").unwrap();
        assert!(limiter.try_reserve(now, 1, "c1").is_err());
        let later = now + Duration::from_secs(61);
        assert!(limiter.try_reserve(later, 1, "c1").is_ok());
    }

    #[test]
    fn test_exactly_at_limit_with_no_reservation_capacity_fails() {
        let mut limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            tokens_per_minute: 1,
        });
        let now = Instant::now();
        limiter.try_reserve(now, 1, "c1").unwrap();
        let result = limiter.try_reserve(now, 1, "c1");
        assert!(result.is_err());
    }
}
