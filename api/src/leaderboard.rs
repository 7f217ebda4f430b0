//! The leaderboard index: an in-process, per-auction ordered cache of
//! eligible bids, primed from the authoritative bid store on miss.
//!
//! No distributed cache service is wired in, so this is modeled as a
//! `RwLock`-guarded ordered map, the same "process-local `Mutex`/`RwLock`
//! guarded shared state" idiom `TimeSource` uses. Reads are wait-free;
//! writes are last-writer-wins across processes, and divergence from the
//! store is repaired by priming: see `admission.rs`'s minimum-step check
//! and `scheduler.rs`'s post-close cleanup.

use payloads::{AuctionId, BidId, LeaderboardEntry};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// The composite ranking key: amount stays as-is but the timestamp is
/// negated, so that *descending* order on the tuple `(amount,
/// inverse_timestamp, inverse_bid_id)` matches the public ordering
/// `(amount desc, timestamp asc)`. `BTreeMap` only walks forward in
/// ascending key order, so `top` below reverses the iterator rather than
/// negating amount too (negating both would make ties resolve latest-first).
/// The bid id component breaks ties between two bids that land at the exact
/// same amount and timestamp, so neither silently overwrites the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    amount_micros: i128,
    inverse_timestamp_nanos: i128,
    inverse_bid_id: u128,
}

fn rank_key(amount: rust_decimal::Decimal, timestamp: jiff::Timestamp, bid_id: BidId) -> RankKey {
    // Scale to a fixed-point integer so Decimal's total order matches i128's.
    let amount_micros = (amount * rust_decimal::Decimal::new(1_000_000, 0))
        .round()
        .mantissa();
    RankKey {
        amount_micros,
        inverse_timestamp_nanos: -(timestamp.as_nanosecond()),
        inverse_bid_id: u128::MAX - bid_id.0.as_u128(),
    }
}

#[derive(Default)]
struct AuctionIndex {
    by_key: BTreeMap<RankKey, LeaderboardEntry>,
    key_by_bid: std::collections::HashMap<BidId, RankKey>,
}

#[derive(Default)]
pub struct Leaderboard {
    auctions: RwLock<std::collections::HashMap<AuctionId, AuctionIndex>>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a bid in the index.
    pub fn add(&self, auction_id: AuctionId, entry: LeaderboardEntry) {
        let key = rank_key(entry.amount, entry.timestamp, entry.id);
        let mut auctions = self.auctions.write().unwrap();
        let index = auctions.entry(auction_id).or_default();
        if let Some(old_key) = index.key_by_bid.insert(entry.id, key) {
            index.by_key.remove(&old_key);
        }
        index.by_key.insert(key, entry);
    }

    /// Remove a bid from the index (winner settlement, withdrawal).
    pub fn remove(&self, auction_id: AuctionId, bid_id: BidId) {
        let mut auctions = self.auctions.write().unwrap();
        if let Some(index) = auctions.get_mut(&auction_id)
            && let Some(key) = index.key_by_bid.remove(&bid_id)
        {
            index.by_key.remove(&key);
        }
    }

    /// Drop the whole per-auction index (after a round closes and winners
    /// settle, or ahead of a re-prime).
    pub fn clear(&self, auction_id: AuctionId) {
        self.auctions.write().unwrap().remove(&auction_id);
    }

    /// True if nothing is cached yet for this auction: the condition that
    /// triggers priming in `admission.rs`.
    pub fn is_empty(&self, auction_id: AuctionId) -> bool {
        self.auctions
            .read()
            .unwrap()
            .get(&auction_id)
            .is_none_or(|idx| idx.by_key.is_empty())
    }

    /// The top `limit` bids, highest amount first, earliest timestamp
    /// breaking ties. `by_key`'s ascending order is (amount asc, inverse
    /// timestamp asc), the reverse of the public ordering, so this walks
    /// the map back to front.
    pub fn top(&self, auction_id: AuctionId, limit: usize) -> Vec<LeaderboardEntry> {
        let auctions = self.auctions.read().unwrap();
        let Some(index) = auctions.get(&auction_id) else {
            return Vec::new();
        };
        index.by_key.values().rev().take(limit).cloned().collect()
    }

    /// Bulk-load a store-ranked set of bids into the index, overwriting
    /// anything cached. Used by the priming path.
    pub fn prime(&self, auction_id: AuctionId, entries: Vec<LeaderboardEntry>) {
        let mut index = AuctionIndex::default();
        for entry in entries {
            let key = rank_key(entry.amount, entry.timestamp, entry.id);
            index.key_by_bid.insert(entry.id, key);
            index.by_key.insert(key, entry);
        }
        self.auctions.write().unwrap().insert(auction_id, index);
    }
}
