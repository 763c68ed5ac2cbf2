use std::time::Duration;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub usage: UsageConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls_per_window: u32,
    pub window_duration_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_calls_per_window: 30,
            window_duration_ms: 60_000,  // 1 minute
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_duration_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_duration_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_duration_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub bid_count_ttl_ms: u64,
    pub current_bid_ttl_ms: u64,
    pub buy_now_ttl_ms: u64,
    pub user_bids_ttl_ms: u64,
    /// Outlives a rate-limit window so a partial fan-out resumes next window
    pub auction_bids_ttl_ms: u64,
}

impl CacheConfig {
    pub fn bid_count_ttl(&self) -> Duration {
        Duration::from_millis(self.bid_count_ttl_ms)
    }

    pub fn current_bid_ttl(&self) -> Duration {
        Duration::from_millis(self.current_bid_ttl_ms)
    }

    pub fn buy_now_ttl(&self) -> Duration {
        Duration::from_millis(self.buy_now_ttl_ms)
    }

    pub fn user_bids_ttl(&self) -> Duration {
        Duration::from_millis(self.user_bids_ttl_ms)
    }

    pub fn auction_bids_ttl(&self) -> Duration {
        Duration::from_millis(self.auction_bids_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            bid_count_ttl_ms: 15_000,
            current_bid_ttl_ms: 15_000,
            buy_now_ttl_ms: 30_000,
            user_bids_ttl_ms: 30_000,
            auction_bids_ttl_ms: 120_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct UsageConfig {
    pub cost_per_call_usd: f64,
    pub call_timeout_ms: u64,
}

impl UsageConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        UsageConfig {
            cost_per_call_usd: 0.0001,
            call_timeout_ms: 30_000,
        }
    }
}
