//! The request-replay envelope: a `(key, scope)`-keyed pending marker
//! followed by a finalized `(status_code, response_body)` pair.
//!
//! Grounded on `currency.rs::create_entry`'s idempotency pre-check
//! (`SELECT id FROM journal_entries WHERE idempotency_key = $1`),
//! generalized into a standalone reusable table/module rather than being
//! folded into a single domain's entry table, since here three different
//! endpoints (deposit, place_bid, withdraw) all need the same envelope.

use jiff::Timestamp;
use jiff_sqlx::ToSqlx;
use payloads::IdempotencyScope;
use sqlx::PgPool;

use super::StoreError;

pub enum Lookup {
    /// No record for this `(key, scope)` yet; caller should do the work.
    Fresh,
    /// A pending marker already exists and no response has been recorded
    /// yet: another request for the same key is in flight.
    InProgress,
    /// The request was already completed; replay this response verbatim.
    Finalized { status_code: i32, response_body: serde_json::Value },
}

/// Look up `(key, scope)`, writing a pending marker if none exists. Returns
/// `Fresh` only when this call is the one that wrote the marker; the
/// caller goes on to do the work and must call [`finalize`] afterward.
#[tracing::instrument(skip(pool))]
pub async fn begin(
    key: &str,
    scope: IdempotencyScope,
    now: Timestamp,
    pool: &PgPool,
) -> Result<Lookup, StoreError> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO idempotency_keys (key, scope, status_code, response_body, created_at)
        VALUES ($1, $2, NULL, NULL, $3)
        ON CONFLICT (key, scope) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(scope)
    .bind(now.to_sqlx())
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(Lookup::Fresh);
    }

    let existing = sqlx::query_as::<_, (Option<i32>, Option<serde_json::Value>)>(
        "SELECT status_code, response_body FROM idempotency_keys WHERE key = $1 AND scope = $2",
    )
    .bind(key)
    .bind(scope)
    .fetch_one(pool)
    .await?;

    match existing {
        (Some(status_code), Some(response_body)) => {
            Ok(Lookup::Finalized { status_code, response_body })
        }
        _ => Ok(Lookup::InProgress),
    }
}

/// Record the final `(status_code, response_body)` for a key this call
/// began with [`begin`]. Call this only once the mutating work succeeds;
/// on failure call [`abandon`] instead so a retry is treated as `Fresh`.
#[tracing::instrument(skip(pool, response_body))]
pub async fn finalize(
    key: &str,
    scope: IdempotencyScope,
    status_code: i32,
    response_body: serde_json::Value,
    pool: &PgPool,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE idempotency_keys SET status_code = $3, response_body = $4
         WHERE key = $1 AND scope = $2",
    )
    .bind(key)
    .bind(scope)
    .bind(status_code)
    .bind(response_body)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a pending marker after the work it guarded failed, so a retry
/// with the same key is treated as `Fresh` rather than wedged `InProgress`
/// forever.
#[tracing::instrument(skip(pool))]
pub async fn abandon(
    key: &str,
    scope: IdempotencyScope,
    pool: &PgPool,
) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM idempotency_keys WHERE key = $1 AND scope = $2 AND status_code IS NULL",
    )
    .bind(key)
    .bind(scope)
    .execute(pool)
    .await?;
    Ok(())
}
