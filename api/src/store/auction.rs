//! Auction and round persistence: creation, liveness reads, and the
//! closure-time bookkeeping (`close_round_tx`, used by `scheduler.rs`'s
//! round-finishing job).
//!
//! A single global auction namespace: no community/site ownership in this
//! domain, unlike a permission-gated, site-scoped auction.

use jiff::{Span, Timestamp};
use jiff_sqlx::{ToSqlx, Timestamp as SqlxTs};
use payloads::{Auction, AuctionId, AuctionStatus, Round, RoundId, RoundStatus};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::StoreError;
use crate::time::TimeSource;

#[derive(Debug, Clone, FromRow)]
struct AuctionRow {
    id: AuctionId,
    title: String,
    total_items: i32,
    status: AuctionStatus,
    current_round_number: i32,
    #[sqlx(try_from = "SqlxTs")]
    created_at: Timestamp,
}

impl From<AuctionRow> for Auction {
    fn from(row: AuctionRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            total_items: row.total_items,
            status: row.status,
            current_round_number: row.current_round_number,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct RoundRow {
    id: RoundId,
    auction_id: AuctionId,
    round_number: i32,
    #[sqlx(try_from = "SqlxTs")]
    start_time: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    end_time: Timestamp,
    status: RoundStatus,
}

impl From<RoundRow> for Round {
    fn from(row: RoundRow) -> Self {
        Self {
            id: row.id,
            auction_id: row.auction_id,
            round_number: row.round_number,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status,
        }
    }
}

/// Persists a new auction with `status=active, current_round_number=0`.
/// If `start_now`, also creates round #1. The caller is responsible for
/// scheduling its closure afterward; the store layer doesn't know about
/// the scheduler.
#[tracing::instrument(skip(pool, time_source))]
pub async fn create_auction(
    title: &str,
    total_items: i32,
    start_now: bool,
    round_duration: Span,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<(Auction, Option<Round>), StoreError> {
    if total_items <= 0 {
        return Err(StoreError::Validation("total_items must be > 0".into()));
    }
    let now = time_source.now();
    let mut tx = pool.begin().await?;

    let auction_row = sqlx::query_as::<_, AuctionRow>(
        r#"
        INSERT INTO auctions (title, total_items, status, current_round_number, created_at)
        VALUES ($1, $2, 'active', 0, $3)
        RETURNING id, title, total_items, status, current_round_number, created_at
        "#,
    )
    .bind(title)
    .bind(total_items)
    .bind(now.to_sqlx())
    .fetch_one(&mut *tx)
    .await?;
    let mut auction: Auction = auction_row.into();

    let round = if start_now {
        let round = create_round_tx(auction.id, 1, now, round_duration, &mut tx).await?;
        auction.current_round_number = 1;
        sqlx::query("UPDATE auctions SET current_round_number = 1 WHERE id = $1")
            .bind(auction.id)
            .execute(&mut *tx)
            .await?;
        Some(round)
    } else {
        None
    };

    tx.commit().await?;
    Ok((auction, round))
}

pub(crate) async fn create_round_tx(
    auction_id: AuctionId,
    round_number: i32,
    now: Timestamp,
    round_duration: Span,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Round, StoreError> {
    let row = sqlx::query_as::<_, RoundRow>(
        r#"
        INSERT INTO rounds (auction_id, round_number, start_time, end_time, status)
        VALUES ($1, $2, $3, $4, 'active')
        RETURNING id, auction_id, round_number, start_time, end_time, status
        "#,
    )
    .bind(auction_id)
    .bind(round_number)
    .bind(now.to_sqlx())
    .bind((now + round_duration).to_sqlx())
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.into())
}

#[tracing::instrument(skip(pool))]
pub async fn get_auction(
    auction_id: AuctionId,
    pool: &PgPool,
) -> Result<Auction, StoreError> {
    sqlx::query_as::<_, AuctionRow>(
        "SELECT id, title, total_items, status, current_round_number, created_at
         FROM auctions WHERE id = $1",
    )
    .bind(auction_id)
    .fetch_optional(pool)
    .await?
    .map(Into::into)
    .ok_or(StoreError::AuctionNotFound)
}

#[tracing::instrument(skip(pool))]
pub async fn get_round(round_id: RoundId, pool: &PgPool) -> Result<Round, StoreError> {
    sqlx::query_as::<_, RoundRow>(
        "SELECT id, auction_id, round_number, start_time, end_time, status
         FROM rounds WHERE id = $1",
    )
    .bind(round_id)
    .fetch_optional(pool)
    .await?
    .map(Into::into)
    .ok_or(StoreError::RoundNotFound)
}

/// The auction's current active round, if any. At most one exists per the
/// DB's partial unique index.
#[tracing::instrument(skip(pool))]
pub async fn get_active_round(
    auction_id: AuctionId,
    pool: &PgPool,
) -> Result<Option<Round>, StoreError> {
    let row = sqlx::query_as::<_, RoundRow>(
        "SELECT id, auction_id, round_number, start_time, end_time, status
         FROM rounds WHERE auction_id = $1 AND status = 'active'",
    )
    .bind(auction_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

/// Returns the existing active round if present (idempotent). Otherwise
/// creates round `current_round_number + 1`.
#[tracing::instrument(skip(pool, time_source))]
pub async fn start_round(
    auction_id: AuctionId,
    round_duration: Span,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<Round, StoreError> {
    let auction = get_auction(auction_id, pool).await?;
    if auction.status != AuctionStatus::Active {
        return Err(StoreError::AuctionNotActive);
    }
    if let Some(round) = get_active_round(auction_id, pool).await? {
        return Ok(round);
    }

    let now = time_source.now();
    let mut tx = pool.begin().await?;
    let round = create_round_tx(
        auction_id,
        auction.current_round_number + 1,
        now,
        round_duration,
        &mut tx,
    )
    .await?;
    sqlx::query("UPDATE auctions SET current_round_number = $2 WHERE id = $1")
        .bind(auction_id)
        .bind(round.round_number)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(round)
}

/// Re-reads a round inside an already-open transaction, used by the
/// anti-sniping critical section (`admission.rs`) which must observe the
/// round's live state under its advisory lock rather than a separate
/// connection's snapshot.
pub(crate) async fn get_round_tx(
    round_id: RoundId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Option<Round>, StoreError> {
    let row = sqlx::query_as::<_, RoundRow>(
        "SELECT id, auction_id, round_number, start_time, end_time, status
         FROM rounds WHERE id = $1",
    )
    .bind(round_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Into::into))
}

/// Persists an anti-sniping extension: advances (never retreats) a round's
/// `end_time` inside the caller's anti-sniping-locked transaction. Returns
/// the updated round, or `None` if the round is no longer active (closed
/// underneath the caller, which is a no-op).
#[tracing::instrument(skip(tx))]
pub async fn extend_round_end_time_tx(
    round_id: RoundId,
    new_end_time: Timestamp,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Option<Round>, StoreError> {
    let row = sqlx::query_as::<_, RoundRow>(
        r#"
        UPDATE rounds
        SET end_time = $2
        WHERE id = $1 AND status = 'active' AND end_time < $2
        RETURNING id, auction_id, round_number, start_time, end_time, status
        "#,
    )
    .bind(round_id)
    .bind(new_end_time.to_sqlx())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Into::into))
}

/// Marks the round closed and bumps the auction's `current_round_number`
/// to this round's number. Called inside the closure transaction after
/// winners/losers have been transitioned.
pub(crate) async fn close_round_tx(
    round: &Round,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE rounds SET status = 'closed' WHERE id = $1")
        .bind(round.id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE auctions SET current_round_number = $2 WHERE id = $1")
        .bind(round.auction_id)
        .bind(round.round_number)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Re-reads an auction inside an already-open transaction, for the closure
/// transaction which needs a consistent view of `status` alongside the bid
/// ranking it's about to act on.
pub(crate) async fn get_auction_tx(
    auction_id: AuctionId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Auction, StoreError> {
    sqlx::query_as::<_, AuctionRow>(
        "SELECT id, title, total_items, status, current_round_number, created_at
         FROM auctions WHERE id = $1",
    )
    .bind(auction_id)
    .fetch_optional(&mut **tx)
    .await?
    .map(Into::into)
    .ok_or(StoreError::AuctionNotFound)
}

/// Round discovery for the closure scheduler: atomically finds one round
/// past its `end_time` and takes a transaction-scoped advisory lock on it,
/// so concurrent scheduler instances don't double-process the same round.
/// Keyed with the `round_close:` prefix, distinct from `admission.rs`'s
/// `round_extend:` prefix, so the two lock use-sites cannot deadlock.
pub(crate) async fn lock_closable_round_tx(
    tx: &mut Transaction<'_, Postgres>,
    now: Timestamp,
) -> Result<Option<Round>, StoreError> {
    let row = sqlx::query_as::<_, RoundRow>(
        r#"
        SELECT id, auction_id, round_number, start_time, end_time, status
        FROM rounds
        WHERE status = 'active'
          AND end_time <= $1
          AND pg_try_advisory_xact_lock(hashtextextended('round_close:' || id::text, 0))
        ORDER BY random()
        LIMIT 1
        "#,
    )
    .bind(now.to_sqlx())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Into::into))
}

/// Admin stop: transitions `active -> finished`, monotonic (no-op if
/// already finished or processing).
#[tracing::instrument(skip(pool))]
pub async fn stop_auction(auction_id: AuctionId, pool: &PgPool) -> Result<(), StoreError> {
    let rows = sqlx::query(
        "UPDATE auctions SET status = 'finished' WHERE id = $1 AND status = 'active'",
    )
    .bind(auction_id)
    .execute(pool)
    .await?
    .rows_affected();
    if rows == 0 {
        // Either missing or already not active; disambiguate for the caller.
        get_auction(auction_id, pool).await?;
    }
    Ok(())
}
