use tracing::Span;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::guard::cache::CacheKey;
use crate::types::ids::PollerId;

pub fn trace_guarded_call(key: &CacheKey) -> Span {
    tracing::debug_span!(
        "guarded_call",
        key = %key,
    )
}

pub fn trace_poll(poller_id: &PollerId, hook: &'static str) -> Span {
    tracing::debug_span!(
        "poll",
        poller_id = %poller_id,
        hook,
    )
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
