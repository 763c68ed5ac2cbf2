use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Guarded call metrics
    pub static ref GUARDED_CALLS: IntCounter = IntCounter::new(
        "bidguard_guarded_calls_total",
        "Outbound calls admitted past every gate"
    ).expect("metric can be created");

    pub static ref GUARDED_CALL_FAILURES: IntCounter = IntCounter::new(
        "bidguard_guarded_call_failures_total",
        "Admitted calls that failed, timed out or returned a malformed payload"
    ).expect("metric can be created");

    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "bidguard_cache_hits_total",
        "Reads served from the response cache"
    ).expect("metric can be created");

    pub static ref GUARD_REJECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("bidguard_guard_rejections_total", "Calls refused by a local gate"),
        &["kind"]
    ).expect("metric can be created");

    // Breaker / emergency stop
    pub static ref CIRCUIT_BREAKER_TRIPS: IntCounter = IntCounter::new(
        "bidguard_circuit_breaker_trips_total",
        "Times the circuit breaker opened"
    ).expect("metric can be created");

    pub static ref EMERGENCY_STOP_ACTIVE: IntGauge = IntGauge::new(
        "bidguard_emergency_stop_active",
        "1 while the emergency stop is set"
    ).expect("metric can be created");

    // Latency metrics
    pub static ref CALL_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bidguard_call_latency_seconds",
            "Latency of admitted outbound calls"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");
}

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(GUARDED_CALLS.clone()))?;
    REGISTRY.register(Box::new(GUARDED_CALL_FAILURES.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS.clone()))?;
    REGISTRY.register(Box::new(GUARD_REJECTIONS.clone()))?;
    REGISTRY.register(Box::new(CIRCUIT_BREAKER_TRIPS.clone()))?;
    REGISTRY.register(Box::new(EMERGENCY_STOP_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(CALL_LATENCY.clone()))?;
    Ok(())
}

/// Prometheus text exposition of everything registered
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(Error::from)?;
    String::from_utf8(buffer).map_err(|e| Error::MetricsError(e.to_string()))
}
