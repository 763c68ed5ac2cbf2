//! Resilience layer for outbound reads: emergency stop, circuit breaker,
//! rate limiter, response cache and usage accounting, composed by
//! [`GuardedFetcher`].

pub mod cache;
pub mod circuit_breaker;
pub mod emergency_stop;
pub mod fetcher;
pub mod rate_limiter;
pub mod usage;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use emergency_stop::{EmergencyStop, ListenerHandle};
pub use fetcher::{GuardedFetcher, RefreshAvailability};
pub use rate_limiter::{RateLimiter, RateLimiterState};
pub use usage::{GuardStatus, UsageManager, UsageStats};
