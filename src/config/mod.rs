use std::time::Duration;
use serde::{Deserialize, Serialize};

pub mod guard;
pub mod loader;

pub use guard::{CacheConfig, CircuitBreakerConfig, GuardConfig, RateLimitConfig, UsageConfig};
pub use loader::AppConfig;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub bid_count_interval_ms: u64,
    pub current_bid_interval_ms: u64,
    pub buy_now_interval_ms: u64,
    pub user_bids_interval_ms: u64,
}

impl PollingConfig {
    pub fn bid_count_interval(&self) -> Duration {
        Duration::from_millis(self.bid_count_interval_ms)
    }

    pub fn current_bid_interval(&self) -> Duration {
        Duration::from_millis(self.current_bid_interval_ms)
    }

    pub fn buy_now_interval(&self) -> Duration {
        Duration::from_millis(self.buy_now_interval_ms)
    }

    pub fn user_bids_interval(&self) -> Duration {
        Duration::from_millis(self.user_bids_interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            bid_count_interval_ms: 15_000,
            current_bid_interval_ms: 15_000,
            buy_now_interval_ms: 30_000,
            user_bids_interval_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct InsightConfig {
    pub base_url: String,
    /// Storefront routes serving `current-bid` and `buy-now`
    pub price_api_url: String,
    pub client_id: String,
    pub request_timeout_ms: u64,
    pub chain_id: u64,
    pub marketplace_address: String,
    pub nft_collection_address: String,
    pub bid_lookback_days: u64,
    pub bid_event_limit: u32,
}

impl InsightConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        InsightConfig {
            base_url: "https://8453.insight.thirdweb.com/v1".to_string(),
            price_api_url: "http://127.0.0.1:3000/api/insight".to_string(),
            client_id: String::new(),
            request_timeout_ms: 30_000,
            chain_id: crate::BASE_CHAIN_ID,
            marketplace_address: "0xF0f26455b9869d4A788191f6AEdc78410731072C".to_string(),
            nft_collection_address: "0xE3f1694adCe46ffcF82D15dd88859147c72f7C5a".to_string(),
            bid_lookback_days: 30,
            bid_event_limit: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info,bidguard=debug".to_string(),
            json: false,
        }
    }
}

/// Tokens (and optionally a wallet) the binary keeps fresh
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub token_ids: Vec<String>,
    pub wallet: Option<String>,
}
