//! Indexing-provider access: wire types, the HTTP client and winning-bid
//! derivation over the events it returns.

pub mod client;
pub mod types;
pub mod winning;

pub use client::InsightClient;
pub use types::{AuctionEvent, BidEvent, WinningBid};
pub use winning::{highest_bid, winning_bids};
