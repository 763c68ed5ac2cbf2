use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use crate::guard::emergency_stop::EmergencyStop;
use crate::utils::clock::Clock;

/// Process-wide fixed-window budget for outbound calls.
///
/// The window rolls lazily: whichever call first observes that
/// `window_duration` has passed starts a fresh window. No timer involved.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    emergency: Arc<EmergencyStop>,
    max_calls_per_window: u32,
    window_ms: u64,
    window: Mutex<Window>,
}

struct Window {
    start: u64,
    calls: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimiterState {
    pub window_start: u64,
    pub calls_in_window: u32,
    pub max_calls_per_window: u32,
    pub window_duration_ms: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>, emergency: Arc<EmergencyStop>) -> Self {
        let start = clock.now_ms();
        RateLimiter {
            clock,
            emergency,
            max_calls_per_window: config.max_calls_per_window,
            window_ms: config.window_duration_ms,
            window: Mutex::new(Window { start, calls: 0 }),
        }
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// True iff the emergency stop is clear and the current window has budget left
    pub fn can_make_call(&self) -> bool {
        if self.emergency.is_active() {
            return false;
        }
        self.with_window(|window, _| window.calls < self.max_calls_per_window)
    }

    /// Count one admitted attempt against the window. Never pushes the count
    /// past the budget: returns false (and records nothing) when full.
    pub fn record_call(&self) -> bool {
        self.with_window(|window, _| {
            if window.calls >= self.max_calls_per_window {
                return false;
            }
            window.calls += 1;
            true
        })
    }

    /// Check and record under one lock. This is what admission uses, so two
    /// callers cannot both pass on the same stale count.
    pub fn try_acquire(&self) -> Result<()> {
        if self.emergency.is_active() {
            return Err(Error::EmergencyStopped {
                reason: self.emergency.reason().unwrap_or_default(),
            });
        }

        self.with_window(|window, now| {
            if window.calls >= self.max_calls_per_window {
                let wait_ms = self.remaining(window, now);
                tracing::debug!(
                    "Rate limit reached: {}/{} calls, window resets in {}ms",
                    window.calls,
                    self.max_calls_per_window,
                    wait_ms
                );
                return Err(Error::RateLimited { wait_ms });
            }
            window.calls += 1;
            Ok(())
        })
    }

    /// Milliseconds until the window resets, 0 if a call is permitted now
    pub fn get_wait_time(&self) -> u64 {
        self.with_window(|window, now| {
            if window.calls < self.max_calls_per_window {
                0
            } else {
                self.remaining(window, now)
            }
        })
    }

    pub fn get_state(&self) -> RateLimiterState {
        self.with_window(|window, _| RateLimiterState {
            window_start: window.start,
            calls_in_window: window.calls,
            max_calls_per_window: self.max_calls_per_window,
            window_duration_ms: self.window_ms,
        })
    }

    fn remaining(&self, window: &Window, now: u64) -> u64 {
        (window.start + self.window_ms).saturating_sub(now)
    }

    fn with_window<T>(&self, f: impl FnOnce(&mut Window, u64) -> T) -> T {
        let now = self.clock.now_ms();
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        if now.saturating_sub(window.start) >= self.window_ms {
            window.start = now;
            window.calls = 0;
        }

        f(&mut window, now)
    }
}
