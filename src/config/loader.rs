use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub guard: GuardConfig,
    pub polling: PollingConfig,
    pub insight: InsightConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub watch: WatchConfig,
}

impl AppConfig {
    /// Layered load: `config/default`, then `config/{env}`, then
    /// `BIDGUARD__SECTION__KEY` environment variables. Read once at startup.
    pub fn load(env: &str) -> Result<Self> {
        Self::load_from("config", env)
    }

    pub fn load_from(dir: &str, env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(&format!("{}/default", dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", dir, env)).required(false))
            .add_source(
                Environment::with_prefix("BIDGUARD")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watch.token_ids")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        let guard = &self.guard;
        if guard.rate_limit.max_calls_per_window == 0 {
            return Err(Error::ConfigError("guard.rate_limit.max_calls_per_window must be > 0".into()));
        }
        if guard.rate_limit.window_duration_ms == 0 {
            return Err(Error::ConfigError("guard.rate_limit.window_duration_ms must be > 0".into()));
        }
        if guard.cache.auction_bids_ttl_ms < guard.rate_limit.window_duration_ms {
            return Err(Error::ConfigError(
                "guard.cache.auction_bids_ttl_ms must be at least guard.rate_limit.window_duration_ms".into(),
            ));
        }
        if guard.circuit_breaker.failure_threshold == 0 {
            return Err(Error::ConfigError("guard.circuit_breaker.failure_threshold must be > 0".into()));
        }
        if guard.usage.call_timeout_ms == 0 {
            return Err(Error::ConfigError("guard.usage.call_timeout_ms must be > 0".into()));
        }
        if guard.usage.cost_per_call_usd < 0.0 {
            return Err(Error::ConfigError("guard.usage.cost_per_call_usd must not be negative".into()));
        }
        Ok(())
    }
}
