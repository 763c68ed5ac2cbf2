use std::collections::HashMap;

use crate::insight::types::{AuctionEvent, BidEvent, EventPosition, WinningBid};
use crate::types::{Address, Wei};

/// Highest bid among `bids`. Equal amounts go to the earliest bid, which is
/// the one the marketplace would have accepted.
pub fn highest_bid(bids: &[BidEvent]) -> Option<&BidEvent> {
    bids.iter().reduce(|best, bid| {
        let outbids = bid.data.bid_amount > best.data.bid_amount;
        let ties_earlier = bid.data.bid_amount == best.data.bid_amount && bid.position() < best.position();
        if outbids || ties_earlier { bid } else { best }
    })
}

/// The user's standing on each live auction they bid on.
///
/// `user_bids` may hold several bids per auction; only the latest counts.
/// `auction_bids` maps auction id to every bid observed on it. The user is
/// winning only when the observed highest bid is theirs and equals their
/// latest bid; an auction with no observed bids is never reported as won.
pub fn winning_bids(
    user: &Address,
    user_bids: &[BidEvent],
    active_auctions: &[AuctionEvent],
    auction_bids: &HashMap<String, Vec<BidEvent>>,
) -> Vec<WinningBid> {
    let mut latest: HashMap<&str, &BidEvent> = HashMap::new();
    for bid in user_bids.iter().filter(|bid| &bid.data.bidder == user) {
        latest
            .entry(bid.data.auction_id.as_str())
            .and_modify(|current| {
                if bid.position() > current.position() {
                    *current = bid;
                }
            })
            .or_insert(bid);
    }

    let mut result: Vec<WinningBid> = active_auctions
        .iter()
        .filter_map(|auction| {
            let auction_id = auction.data.auction_id.as_str();
            let mine = latest.get(auction_id)?;

            let highest = auction_bids
                .get(auction_id)
                .and_then(|bids| highest_bid(bids));
            let is_user_winning = highest
                .map(|top| &top.data.bidder == user && top.data.bid_amount == mine.data.bid_amount)
                .unwrap_or(false);

            Some(WinningBid {
                auction_id: auction_id.to_string(),
                token_id: auction.data.token_id.clone(),
                bid_amount: mine.data.bid_amount.clone(),
                highest_bid: highest.map(|top| top.data.bid_amount.clone()),
                is_user_winning,
                auction: auction.clone(),
            })
        })
        .collect();

    result.sort_by(|a, b| a.auction_id.cmp(&b.auction_id));
    result
}

/// Sum of the user's latest bids still standing as highest
pub fn total_winning_amount(bids: &[WinningBid]) -> Wei {
    bids.iter()
        .filter(|bid| bid.is_user_winning)
        .fold(Wei::zero(), |total, bid| total + &bid.bid_amount)
}
