use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Guard policy decisions
    #[error("Emergency stop active: {reason}")]
    EmergencyStopped {
        reason: String,
    },

    #[error("Circuit breaker open, retry in {retry_after_ms}ms")]
    CircuitOpen {
        retry_after_ms: u64,
    },

    #[error("Rate limit exceeded, wait {wait_ms}ms")]
    RateLimited {
        wait_ms: u64,
    },

    // Outbound call failures
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Response deserialization failed: {0}")]
    DeserializationError(String),

    // Domain value errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Rejections decided locally by the guard. The underlying service was
    /// never contacted and the facade never retries them.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Error::EmergencyStopped { .. } | Error::CircuitOpen { .. } | Error::RateLimited { .. }
        )
    }

    /// Failures that count against the circuit breaker when they come out of
    /// a guarded call.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Error::NetworkFailure(_) | Error::DeserializationError(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmergencyStopped { .. } => ErrorKind::EmergencyStopped,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::NetworkFailure(_) | Error::DeserializationError(_) => ErrorKind::NetworkFailure,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::NetworkFailure(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::DeserializationError(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::MetricsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification surfaced to hooks and the operator API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmergencyStopped,
    CircuitOpen,
    RateLimited,
    NetworkFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmergencyStopped => "emergency_stopped",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejections_are_not_network_failures() {
        let stopped = Error::EmergencyStopped { reason: "cost spike".into() };
        let open = Error::CircuitOpen { retry_after_ms: 10 };
        let limited = Error::RateLimited { wait_ms: 10 };
        for err in [&stopped, &open, &limited] {
            assert!(err.is_policy_rejection());
            assert!(!err.is_network_failure());
        }

        let failure = Error::NetworkFailure("502 Bad Gateway".into());
        assert!(failure.is_network_failure());
        assert!(!failure.is_policy_rejection());
        assert_eq!(failure.kind(), ErrorKind::NetworkFailure);
        assert_eq!(Error::DeserializationError("x".into()).kind(), ErrorKind::NetworkFailure);
    }

    #[test]
    fn messages_carry_wait_hints() {
        assert_eq!(
            Error::RateLimited { wait_ms: 1500 }.to_string(),
            "Rate limit exceeded, wait 1500ms"
        );
        assert_eq!(
            Error::EmergencyStopped { reason: "cost spike".into() }.to_string(),
            "Emergency stop active: cost spike"
        );
    }
}
