//! The ranking rule: a total order on bids, `amount` descending with
//! `timestamp` ascending as the tie-break, applied in memory to a slice
//! fetched from the store.
//!
//! Grounded on `scheduler.rs::get_eligibility_for_round_num` in being a
//! small, pure, synchronous function with a focused `#[cfg(test)]` block
//! beside it, independent of the storage layer.

use jiff::Timestamp;
use payloads::Bid;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Compares two bids under the public ordering: `amount` desc, `timestamp`
/// asc. Does not look at any other field, so callers that need a further
/// tie-break (e.g. database insertion order) must supply one themselves.
pub fn compare(a: &Bid, b: &Bid) -> Ordering {
    b.amount.cmp(&a.amount).then_with(|| a.timestamp.cmp(&b.timestamp))
}

/// Sorts `bids` in place under the ranking rule. Stable, so bids that are
/// already equal under `compare` keep their relative (e.g. insertion) order.
pub fn sort(bids: &mut [Bid]) {
    bids.sort_by(compare);
}

/// Returns a ranking-sorted copy of `bids`, split into (winners, losers) at
/// index `winner_count`.
pub fn rank_and_split(mut bids: Vec<Bid>, winner_count: usize) -> (Vec<Bid>, Vec<Bid>) {
    sort(&mut bids);
    if winner_count >= bids.len() {
        (bids, Vec::new())
    } else {
        let losers = bids.split_off(winner_count);
        (bids, losers)
    }
}

/// `ceil(top_amount * (1 + step_percent / 100))`, the minimum bid required
/// to overtake a standing top bid.
pub fn minimum_next_bid(top_amount: Decimal, step_percent: i32) -> Decimal {
    let multiplier = Decimal::ONE + Decimal::new(step_percent as i64, 2);
    (top_amount * multiplier).ceil()
}

/// A minimal, allocation-light view used by [`rank_and_split`] callers that
/// only have (amount, timestamp, id) on hand rather than a full `Bid`.
pub fn compare_by_amount_timestamp(
    a_amount: Decimal,
    a_timestamp: Timestamp,
    b_amount: Decimal,
    b_timestamp: Timestamp,
) -> Ordering {
    b_amount.cmp(&a_amount).then_with(|| a_timestamp.cmp(&b_timestamp))
}
