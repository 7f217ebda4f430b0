//! Bid persistence: the admission transaction core, ranked reads, and the
//! status transitions applied at round close (`winning`/`outbid`) and
//! withdrawal (`refunded`).
//!
//! Validation order: round liveness, then standing-bid/eligibility checks,
//! then the account lock, then the insert.

use jiff::Timestamp;
use jiff_sqlx::{ToSqlx, Timestamp as SqlxTs};
use payloads::{AuctionId, Bid, BidId, BidStatus, LedgerReason, RoundId, UserId};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::wallet::{self, LedgerMeta};
use super::StoreError;

#[derive(Debug, Clone, FromRow)]
struct BidRow {
    id: BidId,
    auction_id: AuctionId,
    user_id: UserId,
    round_id: RoundId,
    amount: Decimal,
    #[sqlx(try_from = "SqlxTs")]
    bid_timestamp: Timestamp,
    status: BidStatus,
}

impl From<BidRow> for Bid {
    fn from(row: BidRow) -> Self {
        Self {
            id: row.id,
            auction_id: row.auction_id,
            user_id: row.user_id,
            round_id: row.round_id,
            amount: row.amount,
            timestamp: row.bid_timestamp,
            status: row.status,
        }
    }
}

const BID_COLUMNS: &str =
    "id, auction_id, user_id, round_id, amount, bid_timestamp, status";

/// The admission transaction. Ensures the user/wallet exist,
/// holds `amount` out of their available balance, and inserts the bid as
/// `active`. The caller (`admission.rs`) has already validated the round is
/// live and the amount clears the minimum step before opening this
/// transaction; this function re-validates nothing beyond what the wallet
/// hold itself enforces (sufficient funds).
#[tracing::instrument(skip(pool))]
pub async fn create_bid_tx(
    auction_id: AuctionId,
    round_id: RoundId,
    user_id: UserId,
    amount: Decimal,
    now: Timestamp,
    pool: &PgPool,
) -> Result<Bid, StoreError> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }
    let mut tx = pool.begin().await?;
    wallet::ensure_tx(user_id, &mut tx).await?;

    wallet::apply(
        user_id,
        -amount,
        amount,
        LedgerReason::Hold,
        LedgerMeta {
            auction_id: Some(auction_id),
            round_id: Some(round_id),
            bid_id: None,
            idempotency_key: None,
        },
        now,
        &mut tx,
    )
    .await?;

    let row = sqlx::query_as::<_, BidRow>(&format!(
        "INSERT INTO bids (auction_id, user_id, round_id, amount, bid_timestamp, status)
         VALUES ($1, $2, $3, $4, $5, 'active')
         RETURNING {BID_COLUMNS}"
    ))
    .bind(auction_id)
    .bind(user_id)
    .bind(round_id)
    .bind(amount)
    .bind(now.to_sqlx())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.into())
}

#[tracing::instrument(skip(pool))]
pub async fn get_bid(bid_id: BidId, pool: &PgPool) -> Result<Bid, StoreError> {
    sqlx::query_as::<_, BidRow>(&format!("SELECT {BID_COLUMNS} FROM bids WHERE id = $1"))
        .bind(bid_id)
        .fetch_optional(pool)
        .await?
        .map(Into::into)
        .ok_or(StoreError::BidNotFound)
}

/// Re-reads a bid inside an already-open transaction, for a caller that
/// needs to observe a status transition it may have just raced against.
pub(crate) async fn get_bid_tx(
    bid_id: BidId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Bid, StoreError> {
    sqlx::query_as::<_, BidRow>(&format!("SELECT {BID_COLUMNS} FROM bids WHERE id = $1"))
        .bind(bid_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(Into::into)
        .ok_or(StoreError::BidNotFound)
}

/// All bids in an auction currently eligible for ranking: `active` or
/// `outbid` (carried over from an earlier round). `winning` bids have
/// exited the pool and are excluded; `refunded` bids are withdrawn.
#[tracing::instrument(skip(pool))]
pub async fn eligible_bids_for_auction(
    auction_id: AuctionId,
    pool: &PgPool,
) -> Result<Vec<Bid>, StoreError> {
    let rows = sqlx::query_as::<_, BidRow>(&format!(
        "SELECT {BID_COLUMNS} FROM bids
         WHERE auction_id = $1 AND status IN ('active', 'outbid')
         ORDER BY amount DESC, bid_timestamp ASC, seq ASC"
    ))
    .bind(auction_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Same as [`eligible_bids_for_auction`] but read inside the caller's
/// transaction, for the closure path which must rank a consistent
/// snapshot alongside the status transitions it's about to apply.
pub(crate) async fn eligible_bids_for_auction_tx(
    auction_id: AuctionId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<Bid>, StoreError> {
    let rows = sqlx::query_as::<_, BidRow>(&format!(
        "SELECT {BID_COLUMNS} FROM bids
         WHERE auction_id = $1 AND status IN ('active', 'outbid')
         ORDER BY amount DESC, bid_timestamp ASC, seq ASC"
    ))
    .bind(auction_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Transitions a bid to `winning` inside the closure
/// transaction. Winning bids exit the ranking pool; their held funds are
/// settled separately by the caller via `wallet::apply` with
/// `LedgerReason::Settle`. A winner may be carrying over from an earlier
/// round (`outbid`), not just freshly `active`, so both are matched.
pub(crate) async fn mark_winning_tx(
    bid_id: BidId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE bids SET status = 'winning' WHERE id = $1 AND status IN ('active', 'outbid')",
    )
    .bind(bid_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Transitions a losing bid to `outbid`, carrying it over into
/// the next round's ranking pool. Held funds remain locked.
pub(crate) async fn mark_outbid_tx(
    bid_id: BidId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE bids SET status = 'outbid' WHERE id = $1 AND status IN ('active', 'outbid')",
    )
    .bind(bid_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Refunds a non-winning bid's held funds back to the bidder's available
/// balance and marks it `refunded`. Returns the appropriate `StoreError`
/// for each documented condition rather than a generic failure, so
/// `admission.rs` can map them to the right HTTP status.
#[tracing::instrument(skip(pool))]
pub async fn withdraw_bid(
    bid_id: BidId,
    user_id: UserId,
    now: Timestamp,
    pool: &PgPool,
) -> Result<Bid, StoreError> {
    let bid = get_bid(bid_id, pool).await?;
    if bid.user_id != user_id {
        return Err(StoreError::Forbidden);
    }
    match bid.status {
        BidStatus::Winning => return Err(StoreError::WinningLocked),
        BidStatus::Refunded => return Err(StoreError::AlreadyRefunded),
        BidStatus::Active | BidStatus::Outbid => {}
    }

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        "UPDATE bids SET status = 'refunded'
         WHERE id = $1 AND status IN ('active', 'outbid')",
    )
    .bind(bid_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated == 0 {
        // Raced with a round close that transitioned this bid first; re-read
        // to find out whether it was promoted to `winning` rather than
        // already refunded, so the caller gets the right error either way.
        let current = get_bid_tx(bid_id, &mut tx).await?;
        tx.rollback().await?;
        return Err(match current.status {
            BidStatus::Winning => StoreError::WinningLocked,
            _ => StoreError::AlreadyRefunded,
        });
    }

    wallet::apply(
        user_id,
        bid.amount,
        -bid.amount,
        LedgerReason::Refund,
        LedgerMeta {
            auction_id: Some(bid.auction_id),
            round_id: Some(bid.round_id),
            bid_id: Some(bid.id),
            idempotency_key: None,
        },
        now,
        &mut tx,
    )
    .await?;
    tx.commit().await?;

    Ok(Bid { status: BidStatus::Refunded, ..bid })
}
