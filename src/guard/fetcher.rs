use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::config::GuardConfig;
use crate::error::{Error, Result};
use crate::guard::cache::{CacheKey, ResponseCache};
use crate::guard::circuit_breaker::{Admission, CircuitBreaker};
use crate::guard::emergency_stop::{EmergencyStop, ListenerHandle};
use crate::guard::rate_limiter::RateLimiter;
use crate::guard::usage::{UsageManager, UsageStats};
use crate::observability::metrics;
use crate::observability::tracing::trace_guarded_call;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::helper::ceil_secs;

/// The single chokepoint for outbound reads.
///
/// Owns the emergency stop, breaker, limiter, cache and usage counters for
/// the whole process. Build one at startup and share it behind an `Arc`.
pub struct GuardedFetcher {
    emergency: Arc<EmergencyStop>,
    usage: Arc<UsageManager>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    cache: ResponseCache<Value>,
    call_timeout: Duration,
}

impl GuardedFetcher {
    pub fn new(config: &GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let emergency = Arc::new(EmergencyStop::new());
        let usage = Arc::new(UsageManager::new(&config.usage, clock.clone(), emergency.clone()));
        let breaker = CircuitBreaker::new(&config.circuit_breaker, clock.clone(), usage.clone());
        let limiter = RateLimiter::new(&config.rate_limit, clock.clone(), emergency.clone());
        let cache = ResponseCache::new(clock);

        tracing::info!(
            "Guard initialised: {} calls per {}ms, breaker threshold {} / cooldown {}ms, call timeout {}ms",
            config.rate_limit.max_calls_per_window,
            config.rate_limit.window_duration_ms,
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.cooldown_duration_ms,
            config.usage.call_timeout_ms
        );

        GuardedFetcher {
            emergency,
            usage,
            breaker,
            limiter,
            cache,
            call_timeout: config.usage.call_timeout(),
        }
    }

    pub fn with_system_clock(config: &GuardConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Serve `key` from cache or run `perform` through every gate.
    ///
    /// Order: emergency stop, cache, breaker, limiter, call. All bookkeeping
    /// before the call happens synchronously, so admission is settled before
    /// the first suspension point. Failures are never retried here.
    pub async fn guarded_call<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, perform: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let span = trace_guarded_call(key);

        async move {
            if self.emergency.is_active() {
                return Err(self.reject(self.stopped_error()));
            }

            if let Some(value) = self.cached(key) {
                return Ok(value);
            }

            let permit = self.admit()?;
            self.usage.record_call_attempt();

            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(self.call_timeout, perform()) => Some(outcome),
                _ = self.emergency.wait_until_stopped() => None,
            };
            let Some(outcome) = outcome else {
                // Abandoned, not failed: the breaker learns nothing
                drop(permit);
                return Err(self.reject(self.stopped_error()));
            };
            metrics::CALL_LATENCY.observe(started.elapsed().as_secs_f64());

            match outcome {
                Ok(Ok(value)) => {
                    permit.succeed();
                    match serde_json::to_value(&value) {
                        Ok(json) => self.cache.set(key.clone(), json, ttl),
                        Err(e) => tracing::warn!("Not caching {}: {}", key, e),
                    }
                    Ok(value)
                }
                Ok(Err(err)) => {
                    permit.fail();
                    tracing::warn!("Guarded call {} failed: {}", key, err);
                    Err(into_network_failure(err))
                }
                Err(_) => {
                    permit.fail();
                    tracing::warn!("Guarded call {} timed out after {:?}", key, self.call_timeout);
                    Err(Error::NetworkFailure(format!(
                        "timed out after {}ms",
                        self.call_timeout.as_millis()
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }

    fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let json = self.cache.get(key)?;
        match serde_json::from_value(json) {
            Ok(value) => {
                metrics::CACHE_HITS.inc();
                tracing::debug!("Cache hit for {}", key);
                Some(value)
            }
            Err(e) => {
                // Same key reused for a different shape; treat as a miss
                tracing::warn!("Discarding cached {}: {}", key, e);
                self.cache.invalidate(key);
                None
            }
        }
    }

    fn admit(&self) -> Result<CallPermit<'_>> {
        let admission = self.breaker.try_admit().map_err(|e| self.reject(e))?;

        if let Err(e) = self.limiter.try_acquire() {
            if admission == Admission::Probe {
                self.breaker.release_probe();
            }
            return Err(self.reject(e));
        }

        Ok(CallPermit {
            breaker: &self.breaker,
            usage: &self.usage,
            admission,
            settled: false,
        })
    }

    fn reject(&self, err: Error) -> Error {
        metrics::GUARD_REJECTIONS
            .with_label_values(&[err.kind().as_str()])
            .inc();
        tracing::debug!("Guarded call rejected: {}", err);
        err
    }

    fn stopped_error(&self) -> Error {
        Error::EmergencyStopped {
            reason: self.emergency.reason().unwrap_or_default(),
        }
    }

    pub fn force_stop(&self, reason: impl Into<String>) {
        self.usage.force_stop(reason);
    }

    pub fn reset_emergency_stop(&self) {
        self.usage.reset_emergency_stop();
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency.is_active()
    }

    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.usage.add_listener(callback)
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.usage
            .get_usage_stats(&self.breaker, &self.limiter, self.cache.stats())
    }

    /// Whether a manual refresh button should be enabled right now
    pub fn refresh_availability(&self) -> RefreshAvailability {
        let limiter_ok = self.limiter.can_make_call();
        // Half-open counts as available: the refresh becomes the probe
        let breaker_ok = self.breaker.is_call_allowed();

        let cooldown_secs = if !limiter_ok {
            ceil_secs(self.limiter.get_wait_time())
        } else if !breaker_ok {
            ceil_secs(self.breaker.get_state().retry_after_ms)
        } else {
            0
        };

        RefreshAvailability {
            can_refresh: limiter_ok && breaker_ok,
            cooldown_secs,
        }
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn usage(&self) -> &UsageManager {
        &self.usage
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshAvailability {
    pub can_refresh: bool,
    pub cooldown_secs: u64,
}

/// Admitted call. Settling it records the outcome; dropping it unsettled
/// (cancelled caller, emergency stop mid-flight) only hands back a claimed
/// half-open probe.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    usage: &'a UsageManager,
    admission: Admission,
    settled: bool,
}

impl CallPermit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
        self.usage.record_call_success();
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
        self.usage.record_call_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            tracing::debug!("Half-open probe abandoned before completing");
            self.breaker.release_probe();
        }
    }
}

fn into_network_failure(err: Error) -> Error {
    if err.is_network_failure() {
        err
    } else {
        Error::NetworkFailure(err.to_string())
    }
}
