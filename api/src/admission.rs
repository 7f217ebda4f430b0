//! The two use cases that orchestrate the ranking rule, wallet ledger,
//! leaderboard index, and realtime publisher under transactions:
//! `place_bid` and `withdraw`.
//!
//! Both follow the same shape: a sequence of read-only pre-checks, one
//! admission transaction, then a best-effort post-commit section
//! (index/event/lock) whose failure must never unwind the committed
//! mutation.

use jiff::{Span, Timestamp};
use payloads::{AuctionId, AuctionStatus, Bid, BidId, LeaderboardEntry, RealtimeEvent, RoundStatus, UserId};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::leaderboard::Leaderboard;
use crate::ranking;
use crate::realtime::EventPublisher;
use crate::store::{self, StoreError};
use crate::time::TimeSource;

/// The subset of `Config` the admission use cases need, so they don't
/// depend on the whole app config type.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    pub min_bid_step_percent: i32,
    pub anti_sniping_threshold: Span,
    pub anti_sniping_extension: Span,
    pub leaderboard_top_k: usize,
}

async fn ensure_leaderboard_primed(
    auction_id: AuctionId,
    leaderboard: &Leaderboard,
    pool: &PgPool,
) -> Result<(), StoreError> {
    if leaderboard.is_empty(auction_id) {
        let bids = store::bid::eligible_bids_for_auction(auction_id, pool).await?;
        let entries = bids
            .into_iter()
            .map(|b| LeaderboardEntry {
                id: b.id,
                user_id: b.user_id,
                amount: b.amount,
                timestamp: b.timestamp,
            })
            .collect();
        leaderboard.prime(auction_id, entries);
    }
    Ok(())
}

/// Places a bid: validates the minimum step and round liveness, holds the
/// funds and inserts the bid in one transaction, then updates the index
/// and (best-effort) extends the round against sniping.
#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
pub async fn place_bid(
    auction_id: AuctionId,
    user_id: UserId,
    amount: Decimal,
    config: &AdmissionConfig,
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
) -> Result<Bid, StoreError> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }

    // Step 1: minimum-step check, priming the index on a cold cache.
    ensure_leaderboard_primed(auction_id, leaderboard, pool).await?;
    if let Some(top) = leaderboard.top(auction_id, 1).into_iter().next() {
        let required = ranking::minimum_next_bid(top.amount, config.min_bid_step_percent);
        if amount < required {
            return Err(StoreError::BidTooLow { required });
        }
    }

    // Step 2: liveness checks. `now` is captured once and reused as the bid
    // timestamp.
    let auction = store::auction::get_auction(auction_id, pool).await?;
    if auction.status != AuctionStatus::Active {
        return Err(StoreError::AuctionNotActive);
    }
    let round = store::auction::get_active_round(auction_id, pool)
        .await?
        .ok_or(StoreError::RoundNotActive)?;
    let now = time_source.now();
    if now > round.end_time {
        return Err(StoreError::RoundEnded);
    }

    // Step 3: the admission transaction.
    let bid = store::bid::create_bid_tx(auction_id, round.id, user_id, amount, now, pool).await?;

    // Step 4: index insert + leaderboard event. Best-effort: the bid is
    // already committed, so a failure here is logged, not propagated.
    leaderboard.add(
        auction_id,
        LeaderboardEntry { id: bid.id, user_id, amount, timestamp: bid.timestamp },
    );
    publisher.publish(
        auction_id,
        RealtimeEvent::LeaderboardUpdate {
            auction_id,
            bids: leaderboard.top(auction_id, config.leaderboard_top_k),
        },
    );

    // Step 5: anti-sniping, under a round-scoped advisory lock. Never fails
    // the bid.
    if let Err(e) = try_extend_for_sniping(auction_id, round.id, now, config, pool, publisher).await
    {
        tracing::warn!(error = %e, "anti-sniping extension step failed");
    }

    Ok(bid)
}

async fn try_extend_for_sniping(
    auction_id: AuctionId,
    round_id: payloads::RoundId,
    now: Timestamp,
    config: &AdmissionConfig,
    pool: &PgPool,
    publisher: &dyn EventPublisher,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    let lock_key = format!("round_extend:{round_id}");
    let locked: bool =
        sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&lock_key)
            .fetch_one(&mut *tx)
            .await?;
    if !locked {
        // Another concurrent bid is already handling this round's extension.
        return Ok(());
    }

    let Some(round) = store::auction::get_round_tx(round_id, &mut tx).await? else {
        return Ok(());
    };
    if round.status != RoundStatus::Active {
        return Ok(());
    }
    let deadline = now + config.anti_sniping_threshold;
    if round.end_time > deadline {
        return Ok(());
    }

    let new_end_time = round.end_time + config.anti_sniping_extension;
    let extended = store::auction::extend_round_end_time_tx(round_id, new_end_time, &mut tx).await?;
    tx.commit().await?;

    if let Some(round) = extended {
        publisher.publish(
            auction_id,
            RealtimeEvent::RoundExtended { auction_id, round_id: round.id, end_time: round.end_time },
        );
    }
    Ok(())
}

/// Refunds a non-winning bid's held funds and marks it withdrawn.
#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
pub async fn withdraw(
    bid_id: BidId,
    user_id: UserId,
    config: &AdmissionConfig,
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
) -> Result<Bid, StoreError> {
    let bid = store::bid::withdraw_bid(bid_id, user_id, time_source.now(), pool).await?;
    leaderboard.remove(bid.auction_id, bid.id);
    publisher.publish(
        bid.auction_id,
        RealtimeEvent::LeaderboardUpdate {
            auction_id: bid.auction_id,
            bids: leaderboard.top(bid.auction_id, config.leaderboard_top_k),
        },
    );
    Ok(bid)
}
