use async_trait::async_trait;

use crate::error::Result;
use crate::insight::types::{AuctionEvent, BidEvent};
use crate::types::{Address, TokenRef, Wei};

/// Read-only view of the marketplace as served by the indexing provider.
///
/// Implementations make exactly one network request per method; callers are
/// expected to route every call through `GuardedFetcher`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketReader: Send + Sync {
    async fn bid_count(&self, token: &TokenRef) -> Result<u64>;

    /// Highest bid on the token's live auction, `None` without one
    async fn current_bid(&self, token: &TokenRef) -> Result<Option<Wei>>;

    /// Buyout price of the token's live auction, `None` without one
    async fn buy_now_price(&self, token: &TokenRef) -> Result<Option<Wei>>;

    /// Bids placed by `bidder` over the lookback window, newest first
    async fn user_bid_events(&self, bidder: &Address) -> Result<Vec<BidEvent>>;

    async fn active_auctions(&self) -> Result<Vec<AuctionEvent>>;

    /// Every bid placed on one auction
    async fn auction_bid_events(&self, auction_id: &str) -> Result<Vec<BidEvent>>;
}
