use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Address, Wei};

/// Where an event sits on chain. Later events order after earlier ones.
pub trait EventPosition {
    fn block_number(&self) -> u64;
    fn log_index(&self) -> u64;

    fn position(&self) -> (u64, u64) {
        (self.block_number(), self.log_index())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidEvent {
    pub transaction_hash: String,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub block_number: u64,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub log_index: u64,
    pub data: BidData,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidData {
    pub auction_id: String,
    pub token_id: String,
    pub bidder: Address,
    pub bid_amount: Wei,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionEvent {
    pub transaction_hash: String,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub block_number: u64,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub log_index: u64,
    pub data: AuctionData,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionData {
    pub auction_id: String,
    pub token_id: String,
    pub creator: Address,
    pub asset_contract: Address,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub start_timestamp: u64,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub end_timestamp: u64,
    pub min_bid: Wei,
    pub buyout_bid: Wei,
}

impl EventPosition for BidEvent {
    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn log_index(&self) -> u64 {
        self.log_index
    }
}

impl EventPosition for AuctionEvent {
    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn log_index(&self) -> u64 {
        self.log_index
    }
}

/// The user's standing on one live auction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningBid {
    pub auction_id: String,
    pub token_id: String,
    /// The user's latest bid
    pub bid_amount: Wei,
    /// Highest bid observed on the auction, `None` if it could not be determined
    pub highest_bid: Option<Wei>,
    pub is_user_winning: bool,
    pub auction: AuctionEvent,
}

// Wire envelopes

#[derive(Debug, Deserialize)]
pub(crate) struct EventPage<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AggregateResponse {
    #[serde(default)]
    pub aggregations: Vec<CountAggregation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountAggregation {
    #[serde(default, deserialize_with = "u64_from_string_or_number")]
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentBidResponse {
    #[serde(default)]
    pub highest: Option<Wei>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BuyNowResponse {
    #[serde(default)]
    pub buy_now: Option<Wei>,
}

fn u64_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
