//! Persistence layer for the auction core.
//!
//! Each submodule owns one entity family and the transactional operations
//! that mutate it: [`wallet`] (the ledger), [`auction`] (auctions and
//! rounds), [`bid`] (bid admission and ranking queries), and
//! [`idempotency`] (the request-replay envelope). `StoreError` is the single
//! error type threaded through all of them; route handlers convert it to
//! an [`crate::error::APIError`] via `From`.

pub mod auction;
pub mod bid;
pub mod idempotency;
pub mod wallet;

use jiff::Timestamp;
use jiff_sqlx::{ToSqlx, Timestamp as SqlxTs};
use payloads::UserId;
use sqlx::{FromRow, PgPool};

use crate::time::TimeSource;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("auction not found")]
    AuctionNotFound,
    #[error("round not found")]
    RoundNotFound,
    #[error("bid not found")]
    BidNotFound,
    #[error("auction is not active")]
    AuctionNotActive,
    #[error("round is not active")]
    RoundNotActive,
    #[error("round has already ended")]
    RoundEnded,
    #[error("bid is below the minimum step (required {required})")]
    BidTooLow { required: rust_decimal::Decimal },
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("bid belongs to another user")]
    Forbidden,
    #[error("bid is winning and its funds are locked")]
    WinningLocked,
    #[error("bid was already refunded")]
    AlreadyRefunded,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("validation error: {0}")]
    Validation(String),
}

/// A lazily-created user. See [`ensure_user`].
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub wallet_address: Option<String>,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

/// Create the user (and an empty wallet) if one doesn't already exist for
/// this id. Idempotent, safe to call on every deposit/bid.
#[tracing::instrument(skip(pool, time_source))]
pub async fn ensure_user(
    user_id: UserId,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    ensure_user_tx(user_id, &mut tx, time_source).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn ensure_user_tx(
    user_id: UserId,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    time_source: &TimeSource,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO users (id, username, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(format!("user-{}", user_id.0))
    .bind(time_source.now().to_sqlx())
    .execute(&mut **tx)
    .await?;

    wallet::ensure_tx(user_id, tx).await?;

    Ok(())
}
