use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::config::UsageConfig;
use crate::guard::cache::CacheStats;
use crate::guard::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::guard::emergency_stop::{EmergencyStop, ListenerHandle};
use crate::guard::rate_limiter::{RateLimiter, RateLimiterState};
use crate::observability::metrics;
use crate::utils::clock::Clock;

/// Process-wide call accounting plus the emergency-stop control surface.
///
/// Lives for the whole process and is never persisted.
pub struct UsageManager {
    clock: Arc<dyn Clock>,
    emergency: Arc<EmergencyStop>,
    cost_per_call_usd: f64,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    last_reset: Mutex<u64>,
}

impl UsageManager {
    pub fn new(config: &UsageConfig, clock: Arc<dyn Clock>, emergency: Arc<EmergencyStop>) -> Self {
        let started = clock.now_ms();
        UsageManager {
            clock,
            emergency,
            cost_per_call_usd: config.cost_per_call_usd,
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            circuit_breaker_trips: AtomicU64::new(0),
            last_reset: Mutex::new(started),
        }
    }

    pub fn record_call_attempt(&self) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        metrics::GUARDED_CALLS.inc();
    }

    pub fn record_call_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_call_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::SeqCst);
        metrics::GUARDED_CALL_FAILURES.inc();
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::SeqCst);
        metrics::CIRCUIT_BREAKER_TRIPS.inc();
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    pub fn circuit_breaker_trips(&self) -> u64 {
        self.circuit_breaker_trips.load(Ordering::SeqCst)
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.total_calls() as f64 * self.cost_per_call_usd
    }

    pub fn force_stop(&self, reason: impl Into<String>) {
        self.emergency.force_stop(reason);
    }

    pub fn reset_emergency_stop(&self) {
        self.emergency.reset();
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency.is_active()
    }

    pub fn emergency_stop(&self) -> &Arc<EmergencyStop> {
        &self.emergency
    }

    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.emergency.add_listener(callback)
    }

    /// Zero the counters and stamp `last_reset`. The emergency stop is untouched.
    pub fn reset_counters(&self) {
        self.total_calls.store(0, Ordering::SeqCst);
        self.successful_calls.store(0, Ordering::SeqCst);
        self.failed_calls.store(0, Ordering::SeqCst);
        self.circuit_breaker_trips.store(0, Ordering::SeqCst);
        *self.last_reset.lock().unwrap_or_else(|e| e.into_inner()) = self.clock.now_ms();
        tracing::info!("Usage counters reset");
    }

    /// Read-only aggregate of this manager's counters with the breaker,
    /// limiter and cache state at the same instant.
    pub fn get_usage_stats(
        &self,
        breaker: &CircuitBreaker,
        limiter: &RateLimiter,
        cache: CacheStats,
    ) -> UsageStats {
        let last_reset_ms = *self.last_reset.lock().unwrap_or_else(|e| e.into_inner());

        UsageStats {
            total_calls: self.total_calls(),
            successful_calls: self.successful_calls.load(Ordering::SeqCst),
            failed_calls: self.failed_calls(),
            estimated_cost_usd: self.estimated_cost_usd(),
            circuit_breaker_trips: self.circuit_breaker_trips(),
            last_reset: millis_to_datetime(last_reset_ms),
            is_emergency_stopped: self.emergency.is_active(),
            emergency_reason: self.emergency.reason(),
            circuit_breaker: breaker.get_state(),
            rate_limiter: RateLimiterStatus {
                can_make_call: limiter.can_make_call(),
                wait_time_ms: limiter.get_wait_time(),
                state: limiter.get_state(),
            },
            cache,
        }
    }
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_default()
}

#[derive(Clone, Debug, Serialize)]
pub struct RateLimiterStatus {
    pub can_make_call: bool,
    pub wait_time_ms: u64,
    #[serde(flatten)]
    pub state: RateLimiterState,
}

#[derive(Clone, Debug, Serialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub estimated_cost_usd: f64,
    pub circuit_breaker_trips: u64,
    pub last_reset: DateTime<Utc>,
    pub is_emergency_stopped: bool,
    pub emergency_reason: Option<String>,
    pub circuit_breaker: CircuitBreakerState,
    pub rate_limiter: RateLimiterStatus,
    pub cache: CacheStats,
}

impl UsageStats {
    pub fn status(&self) -> GuardStatus {
        if self.is_emergency_stopped {
            GuardStatus::EmergencyStopped
        } else if self.circuit_breaker.is_open {
            GuardStatus::CircuitOpen
        } else if self.rate_limiter.can_make_call {
            GuardStatus::Normal
        } else {
            GuardStatus::Throttled
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }
}

/// Headline state shown to operators, most severe first
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStatus {
    EmergencyStopped,
    CircuitOpen,
    Normal,
    Throttled,
}

impl GuardStatus {
    pub fn label(&self) -> &'static str {
        match self {
            GuardStatus::EmergencyStopped => "EMERGENCY STOPPED",
            GuardStatus::CircuitOpen => "Rate Limited",
            GuardStatus::Normal => "Normal",
            GuardStatus::Throttled => "Throttled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RateLimitConfig};
    use crate::utils::clock::ManualClock;

    struct Fixture {
        usage: Arc<UsageManager>,
        breaker: CircuitBreaker,
        limiter: RateLimiter,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let emergency = Arc::new(EmergencyStop::new());
        let usage = Arc::new(UsageManager::new(
            &UsageConfig {
                cost_per_call_usd: 0.25,
                call_timeout_ms: 30_000,
            },
            clock.clone(),
            emergency.clone(),
        ));
        let breaker = CircuitBreaker::new(
            &CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown_duration_ms: 10_000,
            },
            clock.clone(),
            usage.clone(),
        );
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                max_calls_per_window: 1,
                window_duration_ms: 60_000,
            },
            clock.clone(),
            emergency,
        );
        Fixture { usage, breaker, limiter, clock }
    }

    #[test]
    fn cost_follows_total_calls() {
        let f = fixture();
        f.usage.record_call_attempt();
        f.usage.record_call_attempt();
        f.usage.record_call_failure();

        let stats = f.usage.get_usage_stats(&f.breaker, &f.limiter, CacheStats::default());
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.failed_calls, 1);
        assert!((stats.estimated_cost_usd - 0.5).abs() < 1e-9);
        assert_eq!(stats.status(), GuardStatus::Normal);
    }

    #[test]
    fn status_reflects_most_severe_gate() {
        let f = fixture();
        f.limiter.try_acquire().unwrap();
        let stats = f.usage.get_usage_stats(&f.breaker, &f.limiter, CacheStats::default());
        assert_eq!(stats.status(), GuardStatus::Throttled);
        assert!(stats.rate_limiter.wait_time_ms > 0);

        f.breaker.record_failure();
        let stats = f.usage.get_usage_stats(&f.breaker, &f.limiter, CacheStats::default());
        assert_eq!(stats.status(), GuardStatus::CircuitOpen);
        assert_eq!(stats.circuit_breaker_trips, 1);

        f.usage.force_stop("cost spike");
        let stats = f.usage.get_usage_stats(&f.breaker, &f.limiter, CacheStats::default());
        assert_eq!(stats.status(), GuardStatus::EmergencyStopped);
        assert_eq!(stats.status().label(), "EMERGENCY STOPPED");
        assert_eq!(stats.emergency_reason.as_deref(), Some("cost spike"));
    }

    #[test]
    fn reset_counters_stamps_last_reset() {
        let f = fixture();
        f.usage.record_call_attempt();
        f.clock.advance_ms(5_000);
        f.usage.reset_counters();

        let stats = f.usage.get_usage_stats(&f.breaker, &f.limiter, CacheStats::default());
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.last_reset.timestamp_millis(), 1_700_000_005_000);
    }

    #[test]
    fn snapshot_serializes_for_operators() {
        let f = fixture();
        let stats = f.usage.get_usage_stats(&f.breaker, &f.limiter, CacheStats::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["rate_limiter"]["max_calls_per_window"], 1);
        assert_eq!(json["circuit_breaker"]["is_open"], false);
        assert_eq!(json["is_emergency_stopped"], false);
    }
}
