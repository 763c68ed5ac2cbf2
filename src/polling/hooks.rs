use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::config::{CacheConfig, PollingConfig};
use crate::error::{Error, Result};
use crate::guard::{CacheKey, GuardedFetcher};
use crate::insight::types::{AuctionEvent, BidEvent, WinningBid};
use crate::insight::winning::winning_bids;
use crate::interfaces::MarketReader;
use crate::polling::poller::{spawn_poller, FetchFn, PollerHandle};
use crate::types::{Address, TokenRef, Wei};

/// Every read the storefront makes, named for cache keys and rejection
/// metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarketRead {
    BidCount,
    CurrentBid,
    BuyNowPrice,
    UserBids,
    ActiveAuctions,
    AuctionBids,
}

impl MarketRead {
    pub const TOKEN_READS: [MarketRead; 3] = [
        MarketRead::BidCount,
        MarketRead::CurrentBid,
        MarketRead::BuyNowPrice,
    ];

    pub fn endpoint(&self) -> &'static str {
        match self {
            MarketRead::BidCount => "bid_count",
            MarketRead::CurrentBid => "current_bid",
            MarketRead::BuyNowPrice => "buy_now",
            MarketRead::UserBids => "user_bids",
            MarketRead::ActiveAuctions => "active_auctions",
            MarketRead::AuctionBids => "auction_bids",
        }
    }

    pub fn token_key(&self, token: &TokenRef) -> CacheKey {
        CacheKey::new(self.endpoint(), &token.key_params())
    }

    pub fn key(&self, params: &[&str]) -> CacheKey {
        CacheKey::new(self.endpoint(), params)
    }
}

/// Guarded market reads plus the polling hooks built on them.
///
/// Every read goes through the shared `GuardedFetcher`; nothing here talks
/// to the reader directly.
#[derive(Clone)]
pub struct MarketHooks {
    fetcher: Arc<GuardedFetcher>,
    reader: Arc<dyn MarketReader>,
    polling: PollingConfig,
    ttl: CacheConfig,
}

impl MarketHooks {
    pub fn new(
        fetcher: Arc<GuardedFetcher>,
        reader: Arc<dyn MarketReader>,
        polling: PollingConfig,
        ttl: CacheConfig,
    ) -> Self {
        MarketHooks { fetcher, reader, polling, ttl }
    }

    pub fn fetcher(&self) -> &Arc<GuardedFetcher> {
        &self.fetcher
    }

    pub async fn fetch_bid_count(&self, token: &TokenRef) -> Result<u64> {
        let key = MarketRead::BidCount.token_key(token);
        self.fetcher
            .guarded_call(&key, self.ttl.bid_count_ttl(), || self.reader.bid_count(token))
            .await
    }

    pub async fn fetch_current_bid(&self, token: &TokenRef) -> Result<Option<Wei>> {
        let key = MarketRead::CurrentBid.token_key(token);
        self.fetcher
            .guarded_call(&key, self.ttl.current_bid_ttl(), || self.reader.current_bid(token))
            .await
    }

    pub async fn fetch_buy_now_price(&self, token: &TokenRef) -> Result<Option<Wei>> {
        let key = MarketRead::BuyNowPrice.token_key(token);
        self.fetcher
            .guarded_call(&key, self.ttl.buy_now_ttl(), || self.reader.buy_now_price(token))
            .await
    }

    /// Latest standing on every live auction `bidder` has bid on.
    ///
    /// One guarded read for the user's bids, one for live auctions, then one
    /// per auction the user is in to find its real highest bid. When the
    /// budget or breaker refuses a history read the fan-out stops there and
    /// the remaining auctions are reported unobserved. Histories are cached
    /// for longer than a rate-limit window so the next cycle picks up where
    /// this one stopped.
    pub async fn fetch_winning_bids(&self, bidder: &Address) -> Result<Vec<WinningBid>> {
        let ttl = self.ttl.user_bids_ttl();

        let user_key = MarketRead::UserBids.key(&[bidder.as_str()]);
        let user_bids: Vec<BidEvent> = self
            .fetcher
            .guarded_call(&user_key, ttl, || self.reader.user_bid_events(bidder))
            .await?;
        if user_bids.is_empty() {
            return Ok(Vec::new());
        }

        let auctions_key = MarketRead::ActiveAuctions.key(&[]);
        let auctions: Vec<AuctionEvent> = self
            .fetcher
            .guarded_call(&auctions_key, ttl, || self.reader.active_auctions())
            .await?;

        let history_ttl = self.ttl.auction_bids_ttl();
        let mut auction_bids = HashMap::new();
        for auction in &auctions {
            let auction_id = auction.data.auction_id.as_str();
            let bid_here = user_bids.iter().any(|bid| bid.data.auction_id == auction_id);
            if !bid_here || auction_bids.contains_key(auction_id) {
                continue;
            }

            let key = MarketRead::AuctionBids.key(&[auction_id]);
            let result: Result<Vec<BidEvent>> = self
                .fetcher
                .guarded_call(&key, history_ttl, || self.reader.auction_bid_events(auction_id))
                .await;
            match result {
                Ok(bids) => {
                    auction_bids.insert(auction_id.to_string(), bids);
                }
                Err(err @ (Error::RateLimited { .. } | Error::CircuitOpen { .. })) => {
                    tracing::debug!(
                        "Auction history fan-out for {} stopped after {} reads: {}",
                        bidder,
                        auction_bids.len(),
                        err
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(winning_bids(bidder, &user_bids, &auctions, &auction_bids))
    }

    pub fn bid_count(&self, token: TokenRef) -> PollerHandle<u64> {
        let hooks = self.clone();
        let fetch: FetchFn<u64> = Arc::new(move || {
            let hooks = hooks.clone();
            let token = token.clone();
            async move { hooks.fetch_bid_count(&token).await }.boxed()
        });
        spawn_poller("bid_count", self.polling.bid_count_interval(), fetch)
    }

    pub fn current_bid(&self, token: TokenRef) -> PollerHandle<Option<Wei>> {
        let hooks = self.clone();
        let fetch: FetchFn<Option<Wei>> = Arc::new(move || {
            let hooks = hooks.clone();
            let token = token.clone();
            async move { hooks.fetch_current_bid(&token).await }.boxed()
        });
        spawn_poller("current_bid", self.polling.current_bid_interval(), fetch)
    }

    pub fn buy_now_price(&self, token: TokenRef) -> PollerHandle<Option<Wei>> {
        let hooks = self.clone();
        let fetch: FetchFn<Option<Wei>> = Arc::new(move || {
            let hooks = hooks.clone();
            let token = token.clone();
            async move { hooks.fetch_buy_now_price(&token).await }.boxed()
        });
        spawn_poller("buy_now", self.polling.buy_now_interval(), fetch)
    }

    pub fn user_winning_bids(&self, bidder: Address) -> PollerHandle<Vec<WinningBid>> {
        let hooks = self.clone();
        let fetch: FetchFn<Vec<WinningBid>> = Arc::new(move || {
            let hooks = hooks.clone();
            let bidder = bidder.clone();
            async move { hooks.fetch_winning_bids(&bidder).await }.boxed()
        });
        spawn_poller("user_winning_bids", self.polling.user_bids_interval(), fetch)
    }

    /// Forget cached reads for a token after a bid or buyout lands on it
    pub fn invalidate_token(&self, token: &TokenRef) {
        for read in MarketRead::TOKEN_READS {
            self.fetcher.invalidate(&read.token_key(token));
        }
        tracing::debug!("Invalidated cached reads for {}", token);
    }

    /// Forget the user's bid history and the auctions they are in
    pub fn invalidate_bidder(&self, bidder: &Address) -> usize {
        let removed = self
            .fetcher
            .cache()
            .invalidate_prefix(MarketRead::UserBids.key(&[bidder.as_str()]).as_str())
            + self
                .fetcher
                .cache()
                .invalidate_prefix(MarketRead::AuctionBids.endpoint());
        tracing::debug!("Invalidated {} cached reads for {}", removed, bidder);
        removed
    }
}

/// Poll interval matching a read's TTL, for callers scheduling their own
pub fn poll_interval(read: MarketRead, polling: &PollingConfig) -> Option<Duration> {
    match read {
        MarketRead::BidCount => Some(polling.bid_count_interval()),
        MarketRead::CurrentBid => Some(polling.current_bid_interval()),
        MarketRead::BuyNowPrice => Some(polling.buy_now_interval()),
        MarketRead::UserBids => Some(polling.user_bids_interval()),
        MarketRead::ActiveAuctions | MarketRead::AuctionBids => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::insight::types::{AuctionData, BidData};
    use crate::interfaces::market_reader::MockMarketReader;
    use crate::utils::clock::ManualClock;

    fn addr(byte: char) -> Address {
        Address::parse(&format!("0x{}", byte.to_string().repeat(40))).unwrap()
    }

    fn token(id: &str) -> TokenRef {
        TokenRef::on_base(addr('e'), id)
    }

    fn hooks(reader: MockMarketReader, max_calls: u32) -> MarketHooks {
        hooks_with_clock(reader, max_calls).0
    }

    fn hooks_with_clock(reader: MockMarketReader, max_calls: u32) -> (MarketHooks, Arc<ManualClock>) {
        let mut config = GuardConfig::default();
        config.rate_limit.max_calls_per_window = max_calls;
        let clock = Arc::new(ManualClock::new(0));
        let fetcher = Arc::new(GuardedFetcher::new(&config, clock.clone()));
        (
            MarketHooks::new(fetcher, Arc::new(reader), PollingConfig::default(), config.cache),
            clock,
        )
    }

    fn bid(auction: &str, bidder: &Address, amount: u128, block: u64) -> BidEvent {
        BidEvent {
            transaction_hash: format!("0x{block}"),
            block_number: block,
            log_index: 0,
            data: BidData {
                auction_id: auction.to_string(),
                token_id: "42".to_string(),
                bidder: bidder.clone(),
                bid_amount: Wei::from_u128(amount),
            },
        }
    }

    fn auction(id: &str) -> AuctionEvent {
        AuctionEvent {
            transaction_hash: "0xa".to_string(),
            block_number: 1,
            log_index: 0,
            data: AuctionData {
                auction_id: id.to_string(),
                token_id: "42".to_string(),
                creator: addr('c'),
                asset_contract: addr('e'),
                start_timestamp: 0,
                end_timestamp: 1,
                min_bid: Wei::from_u128(1),
                buyout_bid: Wei::from_u128(1_000),
            },
        }
    }

    #[tokio::test]
    async fn repeated_reads_hit_cache() {
        let mut reader = MockMarketReader::new();
        reader.expect_bid_count().times(1).returning(|_| Ok(4));
        let hooks = hooks(reader, 30);

        assert_eq!(hooks.fetch_bid_count(&token("42")).await.unwrap(), 4);
        assert_eq!(hooks.fetch_bid_count(&token("42")).await.unwrap(), 4);
        assert_eq!(hooks.fetcher().usage_stats().total_calls, 1);
    }

    #[tokio::test]
    async fn invalidate_token_forces_refetch() {
        let mut reader = MockMarketReader::new();
        reader
            .expect_current_bid()
            .times(2)
            .returning(|_| Ok(Some(Wei::from_u128(5))));
        let hooks = hooks(reader, 30);

        hooks.fetch_current_bid(&token("7")).await.unwrap();
        hooks.invalidate_token(&token("7"));
        hooks.fetch_current_bid(&token("7")).await.unwrap();
    }

    #[tokio::test]
    async fn winning_bids_compare_against_auction_history() {
        let me = addr('a');
        let rival = addr('b');
        let mine = vec![bid("1", &me, 100, 10), bid("2", &me, 300, 11)];

        let mut reader = MockMarketReader::new();
        let user_bids = mine.clone();
        reader.expect_user_bid_events().times(1).returning(move |_| Ok(user_bids.clone()));
        reader
            .expect_active_auctions()
            .times(1)
            .returning(|| Ok(vec![auction("1"), auction("2"), auction("3")]));
        let (me_1, rival_1, me_2) = (me.clone(), rival.clone(), me.clone());
        reader.expect_auction_bid_events().times(2).returning(move |id| match id {
            "1" => Ok(vec![bid("1", &me_1, 100, 10), bid("1", &rival_1, 120, 12)]),
            _ => Ok(vec![bid("2", &me_2, 300, 11)]),
        });
        let hooks = hooks(reader, 30);

        let result = hooks.fetch_winning_bids(&me).await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(!result[0].is_user_winning);
        assert!(result[1].is_user_winning);
    }

    #[tokio::test]
    async fn winning_bids_fan_out_resumes_across_windows() {
        let me = addr('a');
        let ids: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        let mine: Vec<BidEvent> = ids.iter().map(|id| bid(id, &me, 100, 10)).collect();
        let live: Vec<AuctionEvent> = ids.iter().map(|id| auction(id)).collect();
        let history_reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut reader = MockMarketReader::new();
        reader.expect_user_bid_events().returning(move |_| Ok(mine.clone()));
        reader.expect_active_auctions().returning(move || Ok(live.clone()));
        let (bidder, reads) = (me.clone(), history_reads.clone());
        reader.expect_auction_bid_events().returning(move |id| {
            reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![bid(id, &bidder, 100, 10)])
        });
        // 8 calls per 60s window, fewer than the 12 a full cycle needs
        let (hooks, clock) = hooks_with_clock(reader, 8);
        let observed = |result: &[WinningBid]| result.iter().filter(|w| w.highest_bid.is_some()).count();

        // First window: two list reads, then histories until the budget runs out
        let first = hooks.fetch_winning_bids(&me).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(observed(&first), 6);
        assert!(first.iter().filter(|w| w.highest_bid.is_none()).all(|w| !w.is_user_winning));

        // Window still spent and the user-bid list has expired
        clock.advance_ms(30_000);
        let err = hooks.fetch_winning_bids(&me).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));

        // Next window: cached histories carry over, only the rest are read
        clock.advance_ms(30_000);
        let second = hooks.fetch_winning_bids(&me).await.unwrap();
        assert_eq!(observed(&second), 10);
        assert!(second.iter().all(|w| w.is_user_winning));
        assert_eq!(history_reads.load(std::sync::atomic::Ordering::SeqCst), 10);

        let mut completed = 2;
        for _ in 0..18 {
            clock.advance_ms(30_000);
            match hooks.fetch_winning_bids(&me).await {
                Ok(result) => {
                    assert_eq!(observed(&result), 10);
                    completed += 1;
                }
                Err(err) => assert!(matches!(err, Error::RateLimited { .. })),
            }
        }
        assert!(completed >= 15);
    }

    #[tokio::test]
    async fn no_bids_means_no_further_reads() {
        let mut reader = MockMarketReader::new();
        reader.expect_user_bid_events().returning(|_| Ok(Vec::new()));
        reader.expect_active_auctions().never();
        let hooks = hooks(reader, 30);

        assert!(hooks.fetch_winning_bids(&addr('a')).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn budget_exhaustion_surfaces_as_rate_limited() {
        let mut reader = MockMarketReader::new();
        reader.expect_bid_count().times(1).returning(|_| Ok(1));
        let hooks = hooks(reader, 1);

        hooks.fetch_bid_count(&token("1")).await.unwrap();
        let err = hooks.fetch_bid_count(&token("2")).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[tokio::test]
    async fn bid_count_hook_publishes_value() {
        let mut reader = MockMarketReader::new();
        reader.expect_bid_count().returning(|_| Ok(11));
        let hooks = hooks(reader, 30);

        let handle = hooks.bid_count(token("42"));
        let mut rx = handle.subscribe();
        rx.wait_for(|state| state.value.is_some()).await.unwrap();

        assert_eq!(handle.state().value, Some(11));
    }

    #[test]
    fn keys_are_scoped_by_read_and_token() {
        let t = token("42");
        assert_ne!(MarketRead::BidCount.token_key(&t), MarketRead::CurrentBid.token_key(&t));
        assert!(MarketRead::BuyNowPrice.token_key(&t).as_str().starts_with("buy_now:8453:"));
        assert_eq!(poll_interval(MarketRead::ActiveAuctions, &PollingConfig::default()), None);
    }
}
