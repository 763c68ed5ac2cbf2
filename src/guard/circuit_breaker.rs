use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::guard::usage::UsageManager;
use crate::utils::clock::Clock;
use crate::utils::helper::alert_operations_team_warning;

/// Consecutive-failure breaker guarding every outbound read.
///
/// Closed → Open after `failure_threshold` consecutive failures. Once the
/// cooldown has elapsed it is half-open: exactly one probe is admitted and
/// its outcome closes the breaker or re-opens it with a fresh cooldown.
pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    usage: Arc<UsageManager>,
    failure_threshold: u32,
    cooldown_ms: u64,
    inner: Mutex<BreakerInner>,
}

#[derive(Default)]
struct BreakerInner {
    failure_count: u32,
    opened_at: Option<u64>,
    probe_in_flight: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u32,
    pub opened_at: Option<u64>,
    pub cooldown_duration_ms: u64,
    /// Open, cooled down, waiting for (or running) its probe
    pub is_half_open: bool,
    /// 0 unless open and still cooling down
    pub retry_after_ms: u64,
}

/// How a call got through the breaker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Closed,
    Probe,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig, clock: Arc<dyn Clock>, usage: Arc<UsageManager>) -> Self {
        CircuitBreaker {
            clock,
            usage,
            failure_threshold: config.failure_threshold.max(1),
            cooldown_ms: config.cooldown_duration_ms,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn get_state(&self) -> CircuitBreakerState {
        let now = self.clock.now_ms();
        let inner = self.lock();
        CircuitBreakerState {
            is_open: inner.opened_at.is_some(),
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
            cooldown_duration_ms: self.cooldown_ms,
            is_half_open: inner.opened_at.is_some_and(|at| self.cooled_down(at, now)),
            retry_after_ms: self.retry_after(&inner, now),
        }
    }

    /// False only while open and still cooling down, or while the single
    /// half-open probe is outstanding.
    pub fn is_call_allowed(&self) -> bool {
        let now = self.clock.now_ms();
        let inner = self.lock();
        match inner.opened_at {
            None => true,
            Some(at) => self.cooled_down(at, now) && !inner.probe_in_flight,
        }
    }

    /// Admission-time check. Claims the half-open probe when the breaker is
    /// cooled down, so concurrent callers cannot all probe at once.
    pub fn try_admit(&self) -> Result<Admission> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();

        let Some(opened_at) = inner.opened_at else {
            return Ok(Admission::Closed);
        };

        if !self.cooled_down(opened_at, now) || inner.probe_in_flight {
            return Err(Error::CircuitOpen {
                retry_after_ms: self.retry_after(&inner, now),
            });
        }

        inner.probe_in_flight = true;
        tracing::info!("Circuit breaker half-open, admitting probe call");
        Ok(Admission::Probe)
    }

    /// Give back a claimed probe whose call never ran (or was abandoned)
    pub fn release_probe(&self) {
        self.lock().probe_in_flight = false;
    }

    pub fn record_success(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.probe_in_flight = false;

        if let Some(opened_at) = inner.opened_at {
            if self.cooled_down(opened_at, now) {
                inner.opened_at = None;
                tracing::info!("Circuit breaker closed after successful probe");
            }
        }
    }

    /// Returns true when this failure tripped (or re-tripped) the breaker
    pub fn record_failure(&self) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.probe_in_flight = false;

        let trip = match inner.opened_at {
            // Failed probe
            Some(opened_at) => self.cooled_down(opened_at, now),
            None => inner.failure_count >= self.failure_threshold,
        };

        if !trip {
            return false;
        }

        inner.opened_at = Some(now);
        let failures = inner.failure_count;
        drop(inner);

        self.usage.record_circuit_breaker_trip();
        tracing::error!(
            "Circuit breaker opened after {} consecutive failures, cooling down for {}ms",
            failures,
            self.cooldown_ms
        );
        alert_operations_team_warning(format!(
            "Circuit breaker opened after {} consecutive failures",
            failures
        ));
        true
    }

    /// Manual close, regardless of cooldown
    pub fn reset(&self) {
        *self.lock() = BreakerInner::default();
        tracing::info!("Circuit breaker reset");
    }

    fn cooled_down(&self, opened_at: u64, now: u64) -> bool {
        now.saturating_sub(opened_at) >= self.cooldown_ms
    }

    fn retry_after(&self, inner: &BreakerInner, now: u64) -> u64 {
        inner
            .opened_at
            .map(|at| (at + self.cooldown_ms).saturating_sub(now))
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
