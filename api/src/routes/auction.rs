//! The public auction surface: reads, bid placement, and withdrawal.

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use payloads::{requests, responses, AuctionConfig, AuctionId, AuctionView, BidId, IdempotencyScope};
use serde::Deserialize;
use sqlx::PgPool;

use crate::admission;
use crate::error::APIError;
use crate::leaderboard::Leaderboard;
use crate::rate_limit::RateLimiter;
use crate::realtime::EventPublisher;
use crate::routes::{idempotency_key_header, run_idempotent};
use crate::store;
use crate::time::TimeSource;
use crate::RuntimeConfig;

#[tracing::instrument(skip(pool))]
#[get("/auction/{auction_id}")]
pub async fn get_auction(
    auction_id: web::Path<AuctionId>,
    pool: web::Data<PgPool>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    let auction_id = auction_id.into_inner();
    let auction = store::auction::get_auction(auction_id, &pool).await?;
    let round = store::auction::get_active_round(auction_id, &pool).await?;
    Ok(HttpResponse::Ok().json(AuctionView {
        auction,
        round,
        config: AuctionConfig { min_bid_step_percent: runtime_config.admission.min_bid_step_percent },
    }))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    limit: Option<usize>,
}

#[tracing::instrument(skip(pool, leaderboard))]
#[get("/auction/{auction_id}/leaderboard")]
pub async fn get_leaderboard(
    auction_id: web::Path<AuctionId>,
    query: web::Query<LeaderboardQuery>,
    pool: web::Data<PgPool>,
    leaderboard: web::Data<Leaderboard>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    let auction_id = auction_id.into_inner();
    let limit = query.limit.unwrap_or(runtime_config.admission.leaderboard_top_k);
    if limit == 0 {
        return Err(APIError::ValidationError("limit must be > 0".into()));
    }

    if leaderboard.is_empty(auction_id) {
        let bids = store::bid::eligible_bids_for_auction(auction_id, &pool).await?;
        let entries = bids
            .into_iter()
            .map(|b| payloads::LeaderboardEntry {
                id: b.id,
                user_id: b.user_id,
                amount: b.amount,
                timestamp: b.timestamp,
            })
            .collect();
        leaderboard.prime(auction_id, entries);
    }
    Ok(HttpResponse::Ok().json(responses::Leaderboard { bids: leaderboard.top(auction_id, limit) }))
}

#[tracing::instrument(skip(pool, time_source, leaderboard, publisher, rate_limiter, req))]
#[post("/auction/{auction_id}/bid")]
pub async fn place_bid(
    req: HttpRequest,
    auction_id: web::Path<AuctionId>,
    body: web::Json<requests::PlaceBid>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    leaderboard: web::Data<Leaderboard>,
    publisher: web::Data<dyn EventPublisher>,
    rate_limiter: web::Data<RateLimiter>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    let auction_id = auction_id.into_inner();
    let body = body.into_inner();

    if !rate_limiter.check(&body.user_id.to_string(), time_source.now()) {
        return Err(APIError::RateLimited);
    }
    store::ensure_user(body.user_id, &pool, &time_source).await?;

    let idempotency_key = idempotency_key_header(&req);
    run_idempotent(
        idempotency_key.as_deref(),
        IdempotencyScope::PlaceBid,
        actix_web::http::StatusCode::CREATED,
        &pool,
        &time_source,
        || async {
            admission::place_bid(
                auction_id,
                body.user_id,
                body.amount,
                &runtime_config.admission,
                &pool,
                &time_source,
                &leaderboard,
                publisher.get_ref(),
            )
            .await
            .map_err(APIError::from)
        },
    )
    .await
}

#[tracing::instrument(skip(pool, time_source, leaderboard, publisher, req))]
#[post("/bid/{bid_id}/withdraw")]
pub async fn withdraw_bid(
    req: HttpRequest,
    bid_id: web::Path<BidId>,
    body: web::Json<requests::Withdraw>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    leaderboard: web::Data<Leaderboard>,
    publisher: web::Data<dyn EventPublisher>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    let bid_id = bid_id.into_inner();
    let body = body.into_inner();
    let idempotency_key = idempotency_key_header(&req);

    run_idempotent(
        idempotency_key.as_deref(),
        IdempotencyScope::Withdraw,
        actix_web::http::StatusCode::OK,
        &pool,
        &time_source,
        || async {
            admission::withdraw(
                bid_id,
                body.user_id,
                &runtime_config.admission,
                &pool,
                &time_source,
                &leaderboard,
                publisher.get_ref(),
            )
            .await
            .map_err(APIError::from)?;
            Ok(responses::SuccessMessage { status: "withdrawn".into() })
        },
    )
    .await
}
