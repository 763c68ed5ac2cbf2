use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;

use crate::config::InsightConfig;
use crate::error::{Error, Result};
use crate::insight::types::{
    AggregateResponse, AuctionEvent, BidEvent, BuyNowResponse, CurrentBidResponse, EventPage,
};
use crate::interfaces::MarketReader;
use crate::types::{Address, TokenRef, Wei};
use crate::utils::helper::current_timestamp_secs;

const NEW_BID_EVENT: &str = "NewBid(address,address,uint256,tuple)";
const NEW_AUCTION_EVENT: &str = "NewAuction(address,uint256,address,tuple)";
/// `status` value of an auction still taking bids
const AUCTION_STATUS_ACTIVE: &str = "1";
const SECS_PER_DAY: u64 = 86_400;

/// HTTP client for the indexing provider and the storefront price routes.
///
/// Knows nothing about budgets or caching; wrap every call in
/// `GuardedFetcher::guarded_call`.
#[derive(Clone)]
pub struct InsightClient {
    client: reqwest::Client,
    base_url: String,
    price_api_url: String,
    marketplace: Address,
    bid_lookback: Duration,
    bid_event_limit: u32,
}

impl InsightClient {
    pub fn new(config: &InsightConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if !config.client_id.is_empty() {
            let value = HeaderValue::from_str(&config.client_id)
                .map_err(|e| Error::ConfigError(format!("insight.client_id: {}", e)))?;
            headers.insert("x-client-id", value);
        } else {
            tracing::warn!("No insight client id configured; provider may reject requests");
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::ConfigError(format!("http client: {}", e)))?;

        Ok(InsightClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            price_api_url: config.price_api_url.trim_end_matches('/').to_string(),
            marketplace: Address::parse(&config.marketplace_address)?,
            bid_lookback: Duration::from_secs(config.bid_lookback_days * SECS_PER_DAY),
            bid_event_limit: config.bid_event_limit,
        })
    }

    fn events_url(&self, contract: &Address, signature: &str) -> String {
        format!("{}/events/{}/{}", self.base_url, contract, signature)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::NetworkFailure(format!("{} returned {}", url, status)));
        }

        Ok(response.json::<T>().await?)
    }

    fn token_query(token: &TokenRef) -> Vec<(&'static str, String)> {
        vec![
            ("contract", token.contract.to_string()),
            ("tokenId", token.token_id.clone()),
        ]
    }
}

#[async_trait]
impl MarketReader for InsightClient {
    async fn bid_count(&self, token: &TokenRef) -> Result<u64> {
        let url = self.events_url(&token.contract, NEW_BID_EVENT);
        let query = [
            ("aggregate", "count()".to_string()),
            ("filters[auctionId]", token.token_id.clone()),
        ];
        let response: AggregateResponse = self.get_json(&url, &query).await?;

        Ok(response.aggregations.first().map(|a| a.count).unwrap_or(0))
    }

    async fn current_bid(&self, token: &TokenRef) -> Result<Option<Wei>> {
        let url = format!("{}/current-bid", self.price_api_url);
        let response: CurrentBidResponse = self.get_json(&url, &Self::token_query(token)).await?;
        Ok(response.highest)
    }

    async fn buy_now_price(&self, token: &TokenRef) -> Result<Option<Wei>> {
        let url = format!("{}/buy-now", self.price_api_url);
        let response: BuyNowResponse = self.get_json(&url, &Self::token_query(token)).await?;
        Ok(response.buy_now)
    }

    async fn user_bid_events(&self, bidder: &Address) -> Result<Vec<BidEvent>> {
        let since = current_timestamp_secs().saturating_sub(self.bid_lookback.as_secs());
        let url = self.events_url(&self.marketplace, NEW_BID_EVENT);
        let query = [
            ("filters[bidder]", bidder.to_string()),
            ("filter_block_timestamp_gte", since.to_string()),
            ("sort_by", "block_number".to_string()),
            ("sort_order", "desc".to_string()),
            ("limit", self.bid_event_limit.to_string()),
        ];
        let page: EventPage<BidEvent> = self.get_json(&url, &query).await?;
        Ok(page.result)
    }

    async fn active_auctions(&self) -> Result<Vec<AuctionEvent>> {
        let url = self.events_url(&self.marketplace, NEW_AUCTION_EVENT);
        let query = [("filters[status]", AUCTION_STATUS_ACTIVE.to_string())];
        let page: EventPage<AuctionEvent> = self.get_json(&url, &query).await?;
        Ok(page.result)
    }

    async fn auction_bid_events(&self, auction_id: &str) -> Result<Vec<BidEvent>> {
        let url = self.events_url(&self.marketplace, NEW_BID_EVENT);
        let query = [
            ("filters[auctionId]", auction_id.to_string()),
            ("limit", self.bid_event_limit.to_string()),
        ];
        let page: EventPage<BidEvent> = self.get_json(&url, &query).await?;
        Ok(page.result)
    }
}
