use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use bidguard::api::{create_router, ApiState};
use bidguard::config::AppConfig;
use bidguard::guard::GuardedFetcher;
use bidguard::insight::InsightClient;
use bidguard::interfaces::MarketReader;
use bidguard::observability::{metrics, tracing::init_tracing};
use bidguard::polling::MarketHooks;
use bidguard::types::{Address, TokenRef};
use bidguard::utils::task_supervisor::TaskSupervisor;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("BIDGUARD_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env).context("loading configuration")?;

    init_tracing(&config.logging);
    metrics::register_metrics().context("registering metrics")?;
    tracing::info!("Starting bidguard ({})", env);

    let fetcher = Arc::new(GuardedFetcher::with_system_clock(&config.guard));
    let reader: Arc<dyn MarketReader> =
        Arc::new(InsightClient::new(&config.insight).context("building insight client")?);
    let hooks = MarketHooks::new(
        fetcher.clone(),
        reader,
        config.polling.clone(),
        config.guard.cache.clone(),
    );

    // Handles must outlive the runtime loop; dropping one stops its poller
    let collection = Address::parse(&config.insight.nft_collection_address)?;
    let mut bid_count_pollers = Vec::new();
    let mut current_bid_pollers = Vec::new();
    let mut buy_now_pollers = Vec::new();
    for token_id in &config.watch.token_ids {
        let token = TokenRef::new(collection.clone(), token_id.as_str(), config.insight.chain_id);
        bid_count_pollers.push(hooks.bid_count(token.clone()));
        current_bid_pollers.push(hooks.current_bid(token.clone()));
        buy_now_pollers.push(hooks.buy_now_price(token));
    }
    let winning_poller = match &config.watch.wallet {
        Some(wallet) => Some(hooks.user_winning_bids(Address::parse(wallet)?)),
        None => None,
    };
    tracing::info!(
        "Watching {} tokens{}",
        config.watch.token_ids.len(),
        if winning_poller.is_some() { " and one wallet" } else { "" }
    );

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.api.bind_addr))?;
    tracing::info!("Operator API listening on {}", config.api.bind_addr);
    let router = create_router(ApiState::new(fetcher.clone()));

    let mut supervisor = TaskSupervisor::new();
    supervisor.spawn("operator_api", async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("Operator API stopped: {}", e);
        }
    });

    let purging = fetcher.clone();
    supervisor.spawn("cache_purge", async move {
        let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = purging.cache().purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired cache entries", purged);
            }
        }
    });

    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = health.tick() => {
                if let Err(e) = supervisor.check_health() {
                    tracing::error!("{}", e);
                }
                let stats = fetcher.usage_stats();
                tracing::info!(
                    "Usage: {} calls, {} failed, ${:.4} estimated, status {}",
                    stats.total_calls,
                    stats.failed_calls,
                    stats.estimated_cost_usd,
                    stats.status().label()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    drop(winning_poller);
    drop(buy_now_pollers);
    drop(current_bid_pollers);
    drop(bid_count_pollers);
    supervisor.shutdown_all();
    tracing::info!("bidguard stopped");
    Ok(())
}
