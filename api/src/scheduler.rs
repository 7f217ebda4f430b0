//! The round closure worker: a polling loop that discovers rounds past
//! their `end_time` and closes them.
//!
//! A `tokio::time::interval` tick drives a loop that repeatedly takes
//! a transaction-scoped advisory lock on "the next thing needing work" and
//! processes it in a separate transaction, so several scheduler instances
//! can run against the same database without double-processing. There is
//! no separate job queue: scheduling and rescheduling are realized
//! implicitly by each tick re-querying `rounds WHERE status = 'active' AND
//! end_time <= now()`. Extending a round's `end_time` (admission.rs) or
//! creating a new round (this module) is itself "(re)scheduling", since the
//! next tick will simply no longer (or will newly) find the row.

use jiff::Span;
use payloads::{AuctionStatus, Bid, BidStatus, LedgerReason, RealtimeEvent, Round};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::leaderboard::Leaderboard;
use crate::ranking;
use crate::realtime::EventPublisher;
use crate::store::{self, wallet::LedgerMeta, StoreError};
use crate::telemetry::log_error;
use crate::time::TimeSource;

pub struct Scheduler {
    pool: PgPool,
    time_source: TimeSource,
    tick_interval: Duration,
    leaderboard: Arc<Leaderboard>,
    publisher: Arc<dyn EventPublisher>,
    round_duration: Span,
    leaderboard_top_k: usize,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        time_source: TimeSource,
        tick_interval: Duration,
        leaderboard: Arc<Leaderboard>,
        publisher: Arc<dyn EventPublisher>,
        round_duration: Span,
        leaderboard_top_k: usize,
    ) -> Self {
        Self {
            pool,
            time_source,
            tick_interval,
            leaderboard,
            publisher,
            round_duration,
            leaderboard_top_k,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            let _ = self.tick().await.map_err(log_error);
        }
    }

    /// Runs one tick's worth of work. Exposed directly so tests can drive
    /// closure deterministically against a mock clock instead of sleeping
    /// in real time.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> anyhow::Result<()> {
        process_rounds_needing_closure(
            &self.pool,
            &self.time_source,
            &self.leaderboard,
            self.publisher.as_ref(),
            self.round_duration,
            self.leaderboard_top_k,
        )
        .await
    }
}

#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
async fn process_rounds_needing_closure(
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
    round_duration: Span,
    leaderboard_top_k: usize,
) -> anyhow::Result<()> {
    loop {
        match process_next_closable_round(
            pool,
            time_source,
            leaderboard,
            publisher,
            round_duration,
            leaderboard_top_k,
        )
        .await
        {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => {
                tracing::error!("failed to close round: {e:#}");
                continue;
            }
        }
    }
    Ok(())
}

/// Locks and closes the next round past its `end_time`. Returns `Ok(true)`
/// if one was processed, `Ok(false)` if none are currently closable.
#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
async fn process_next_closable_round(
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
    round_duration: Span,
    leaderboard_top_k: usize,
) -> anyhow::Result<bool> {
    // This transaction holds only the advisory lock for coordination; no
    // other database operations are attached to it.
    let mut coordination_tx = pool.begin().await?;
    let round = match store::auction::lock_closable_round_tx(
        &mut coordination_tx,
        time_source.now(),
    )
    .await?
    {
        Some(r) => r,
        None => return Ok(false),
    };

    let result = finish_round(
        &round,
        pool,
        time_source,
        leaderboard,
        publisher,
        round_duration,
        leaderboard_top_k,
    )
    .await;
    coordination_tx.commit().await?;
    result.map(|()| true).map_err(Into::into)
}

/// Forces a specific round closed regardless of `end_time`, for the
/// `POST /admin/round/:id/close` override. Takes the same `round_close:`
/// advisory lock the tick scheduler uses, keyed to this round, so an
/// in-flight tick closure and an admin-triggered one can't double-settle
/// it; if the lock is already held, this call is a no-op (the other closer
/// will finish the job). Already-closed rounds are a no-op too, since the
/// endpoint is idempotent.
#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
pub async fn close_round_now(
    round_id: payloads::RoundId,
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
    round_duration: Span,
    leaderboard_top_k: usize,
) -> Result<(), StoreError> {
    let mut coordination_tx = pool.begin().await?;
    let lock_key = format!("round_close:{round_id}");
    let locked: bool =
        sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&lock_key)
            .fetch_one(&mut *coordination_tx)
            .await?;
    if !locked {
        coordination_tx.commit().await?;
        return Ok(());
    }

    let round = store::auction::get_round(round_id, pool).await?;
    let result = if round.status == payloads::RoundStatus::Active {
        settle_round(
            &round,
            pool,
            time_source,
            leaderboard,
            publisher,
            round_duration,
            leaderboard_top_k,
            true, // admin override: close regardless of end_time
        )
        .await
    } else {
        Ok(())
    };
    coordination_tx.commit().await?;
    result
}

/// Settles the bids for a round that has already been located and locked
/// by the caller.
#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
async fn finish_round(
    round: &Round,
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
    round_duration: Span,
    leaderboard_top_k: usize,
) -> Result<(), StoreError> {
    // Step 1/2: the discovery query already filters on status='active' AND
    // end_time <= now, but `round` was captured at that discovery instant
    // under the `round_close:` lock, but an anti-sniping extension (a
    // different, independent `round_extend:` lock) could have landed and
    // committed since. The authoritative re-check happens against a fresh
    // read inside `settle_round`'s own transaction.
    settle_round(
        round,
        pool,
        time_source,
        leaderboard,
        publisher,
        round_duration,
        leaderboard_top_k,
        false,
    )
    .await
}

/// The shared settlement body for both the tick scheduler and the admin
/// force-close override: rank eligible bids, transition winners/losers,
/// close the round, seed the next one, then publish events. `force` skips
/// the `end_time` re-check (the admin `/admin/round/:id/close` override
/// closes regardless of whether the round has actually expired); the tick
/// scheduler always passes `false` so a stale job can never close a round
/// an anti-sniping extension has since pushed into the future.
async fn settle_round(
    round: &Round,
    pool: &PgPool,
    time_source: &TimeSource,
    leaderboard: &Leaderboard,
    publisher: &dyn EventPublisher,
    round_duration: Span,
    leaderboard_top_k: usize,
    force: bool,
) -> Result<(), StoreError> {
    let now = time_source.now();
    let mut tx = pool.begin().await?;

    // Re-read the round inside this transaction: it may have been extended
    // (or already closed by a racing closer) since the caller last looked at
    // it. Only a round still `active` is eligible to close here at all, and
    // (unless `force`) only once its `end_time` has actually passed;
    // otherwise this is a stale-job no-op and the round will be picked up
    // again (if/when it's actually due) by the discovery query.
    let Some(round) = store::auction::get_round_tx(round.id, &mut tx).await? else {
        tx.rollback().await?;
        return Ok(());
    };
    if round.status != payloads::RoundStatus::Active || (!force && now < round.end_time) {
        tx.rollback().await?;
        return Ok(());
    }
    let round = &round;

    let auction = store::auction::get_auction_tx(round.auction_id, &mut tx).await?;
    let eligible = store::bid::eligible_bids_for_auction_tx(round.auction_id, &mut tx).await?;
    let (winners, losers) = ranking::rank_and_split(eligible, auction.total_items as usize);

    for winner in &winners {
        store::bid::mark_winning_tx(winner.id, &mut tx).await?;
        store::wallet::apply(
            winner.user_id,
            Decimal::ZERO,
            -winner.amount,
            LedgerReason::Settle,
            LedgerMeta {
                auction_id: Some(round.auction_id),
                round_id: Some(round.id),
                bid_id: Some(winner.id),
                idempotency_key: None,
            },
            now,
            &mut tx,
        )
        .await?;
    }
    for loser in &losers {
        store::bid::mark_outbid_tx(loser.id, &mut tx).await?;
    }
    store::auction::close_round_tx(round, &mut tx).await?;

    // Step 5: seed the next round if the auction is still active.
    if auction.status == AuctionStatus::Active {
        let next = store::auction::create_round_tx(
            auction.id,
            round.round_number + 1,
            now,
            round_duration,
            &mut tx,
        )
        .await?;
        sqlx::query("UPDATE auctions SET current_round_number = $2 WHERE id = $1")
            .bind(auction.id)
            .bind(next.round_number)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    // Step 4: index cleanup + events, best-effort post-commit.
    let winners: Vec<Bid> = winners
        .into_iter()
        .map(|b| Bid { status: BidStatus::Winning, ..b })
        .collect();
    for winner in &winners {
        leaderboard.remove(round.auction_id, winner.id);
    }
    publisher.publish(
        round.auction_id,
        RealtimeEvent::LeaderboardUpdate {
            auction_id: round.auction_id,
            bids: leaderboard.top(round.auction_id, leaderboard_top_k),
        },
    );
    publisher.publish(
        round.auction_id,
        RealtimeEvent::RoundClosed {
            auction_id: round.auction_id,
            round_id: round.id,
            winners,
        },
    );

    Ok(())
}
