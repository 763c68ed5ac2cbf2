use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get current timestamp in seconds since epoch
pub fn current_timestamp_secs() -> u64 {
    current_timestamp_ms() / 1000
}

/// Whole seconds an operator has to wait, rounded up (a 1ms wait shows as 1s)
pub fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// Alert operations team (critical)
///
/// Breaker trips and emergency stops land here. Alerts go to the dedicated
/// `operator_alert` target so a subscriber can route them separately.
pub fn alert_operations_team_critical(message: String) {
    tracing::error!(target: "operator_alert", severity = "critical", "CRITICAL ALERT: {}", message);
}

/// Alert operations team (warning)
pub fn alert_operations_team_warning(message: String) {
    tracing::warn!(target: "operator_alert", severity = "warning", "WARNING ALERT: {}", message);
}
