//! The wallet ledger: atomic available/locked balance deltas with an
//! append-only history.
//!
//! Grounded on `currency.rs::create_entry`'s single `UPDATE ... SET
//! balance_cached = balance_cached + $1` balance update, generalized from an
//! unconditional update (that domain enforces credit limits via a separate
//! pre-check under `SELECT ... FOR UPDATE`) into a single conditional
//! `UPDATE ... WHERE ... RETURNING *` so the non-negativity check and the
//! mutation happen in the same atomic statement, with no read-modify-write
//! in application code.

use jiff::Timestamp;
use jiff_sqlx::{ToSqlx, Timestamp as SqlxTs};
use payloads::{AuctionId, BidId, LedgerReason, RoundId, UserId, Wallet};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::StoreError;

/// Metadata recorded alongside a ledger entry, identifying what caused it.
#[derive(Debug, Clone, Default)]
pub struct LedgerMeta {
    pub auction_id: Option<AuctionId>,
    pub round_id: Option<RoundId>,
    pub bid_id: Option<BidId>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct WalletRow {
    user_id: UserId,
    available_balance: Decimal,
    locked_balance: Decimal,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Self {
            user_id: row.user_id,
            available_balance: row.available_balance,
            locked_balance: row.locked_balance,
        }
    }
}

/// Idempotent upsert with initial balances (0, 0).
pub async fn ensure(user_id: UserId, pool: &PgPool) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    ensure_tx(user_id, &mut tx).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn ensure_tx(
    user_id: UserId,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, available_balance, locked_balance)
        VALUES ($1, 0, 0)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[tracing::instrument(skip(pool))]
pub async fn get(user_id: UserId, pool: &PgPool) -> Result<Wallet, StoreError> {
    let row = sqlx::query_as::<_, WalletRow>(
        "SELECT user_id, available_balance, locked_balance
         FROM wallets WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .unwrap_or(WalletRow {
        user_id,
        available_balance: Decimal::ZERO,
        locked_balance: Decimal::ZERO,
    });
    Ok(row.into())
}

/// Atomic conditional increment of a user's wallet. Fails with
/// `InsufficientFunds` if either resulting balance would go negative. On
/// success, writes a ledger entry with the deltas and `meta` in the same
/// statement-adjacent insert, inside the caller's transaction. Callers are
/// responsible for committing alongside the causing side effect (bid
/// create, bid status change) so that balance and bid state cannot diverge.
#[tracing::instrument(skip(tx))]
pub async fn apply(
    user_id: UserId,
    available_delta: Decimal,
    locked_delta: Decimal,
    reason: LedgerReason,
    meta: LedgerMeta,
    now: Timestamp,
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Wallet, StoreError> {
    let row = sqlx::query_as::<_, WalletRow>(
        r#"
        UPDATE wallets
        SET available_balance = available_balance + $2,
            locked_balance = locked_balance + $3
        WHERE user_id = $1
          AND available_balance + $2 >= 0
          AND locked_balance + $3 >= 0
        RETURNING user_id, available_balance, locked_balance
        "#,
    )
    .bind(user_id)
    .bind(available_delta)
    .bind(locked_delta)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::InsufficientFunds)?;

    sqlx::query(
        r#"
        INSERT INTO wallet_ledger_entries (
            user_id, available_delta, locked_delta, reason,
            auction_id, round_id, bid_id, idempotency_key, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(user_id)
    .bind(available_delta)
    .bind(locked_delta)
    .bind(reason)
    .bind(meta.auction_id)
    .bind(meta.round_id)
    .bind(meta.bid_id)
    .bind(meta.idempotency_key)
    .bind(now.to_sqlx())
    .execute(&mut **tx)
    .await?;

    Ok(row.into())
}

/// Credit a user's available balance (admin deposit). Ensures the wallet
/// exists first since a deposit may be the user's first touch.
#[tracing::instrument(skip(pool))]
pub async fn deposit(
    user_id: UserId,
    amount: Decimal,
    idempotency_key: Option<String>,
    now: Timestamp,
    pool: &PgPool,
) -> Result<Wallet, StoreError> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO users (id, username, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(format!("user-{}", user_id.0))
    .bind(now.to_sqlx())
    .execute(&mut *tx)
    .await?;
    ensure_tx(user_id, &mut tx).await?;

    let wallet = apply(
        user_id,
        amount,
        Decimal::ZERO,
        LedgerReason::Credit,
        LedgerMeta { idempotency_key, ..Default::default() },
        now,
        &mut tx,
    )
    .await?;
    tx.commit().await?;
    Ok(wallet)
}
