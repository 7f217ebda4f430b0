//! `/admin/*` routes: auction lifecycle management and manual deposits.
//! Gated by `AdminAuthMiddleware` (see `lib.rs`) when `ADMIN_TOKEN` is set.

use actix_web::{post, web, HttpRequest, HttpResponse};
use payloads::{requests, responses, AuctionId, IdempotencyScope, RoundId, UserId};
use sqlx::PgPool;

use crate::error::APIError;
use crate::leaderboard::Leaderboard;
use crate::realtime::EventPublisher;
use crate::routes::{idempotency_key_header, run_idempotent};
use crate::store;
use crate::time::TimeSource;
use crate::RuntimeConfig;

#[tracing::instrument(skip(pool, time_source))]
#[post("/admin/auction")]
pub async fn create_auction(
    body: web::Json<requests::CreateAuction>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    let body = body.into_inner();
    let (auction, round) = store::auction::create_auction(
        &body.title,
        body.total_items,
        body.start_now,
        runtime_config.round_duration,
        &pool,
        &time_source,
    )
    .await?;
    Ok(HttpResponse::Created().json(responses::CreateAuctionResponse { auction, round }))
}

#[tracing::instrument(skip(pool, time_source))]
#[post("/admin/auction/{auction_id}/start")]
pub async fn start_auction(
    auction_id: web::Path<AuctionId>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    let round = store::auction::start_round(
        auction_id.into_inner(),
        runtime_config.round_duration,
        &pool,
        &time_source,
    )
    .await?;
    Ok(HttpResponse::Ok().json(round))
}

#[tracing::instrument(skip(pool, time_source, leaderboard, publisher))]
#[post("/admin/round/{round_id}/close")]
pub async fn close_round(
    round_id: web::Path<RoundId>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    leaderboard: web::Data<Leaderboard>,
    publisher: web::Data<dyn EventPublisher>,
    runtime_config: web::Data<RuntimeConfig>,
) -> Result<HttpResponse, APIError> {
    crate::scheduler::close_round_now(
        round_id.into_inner(),
        &pool,
        &time_source,
        &leaderboard,
        publisher.get_ref(),
        runtime_config.round_duration,
        runtime_config.admission.leaderboard_top_k,
    )
    .await?;
    Ok(HttpResponse::Ok().json(responses::SuccessMessage { status: "closed".into() }))
}

#[tracing::instrument(skip(pool))]
#[post("/admin/auction/{auction_id}/stop")]
pub async fn stop_auction(
    auction_id: web::Path<AuctionId>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    store::auction::stop_auction(auction_id.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(responses::SuccessMessage { status: "finished".into() }))
}

#[tracing::instrument(skip(pool, time_source, req))]
#[post("/admin/users/{user_id}/deposit")]
pub async fn deposit(
    req: HttpRequest,
    user_id: web::Path<UserId>,
    body: web::Json<requests::Deposit>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    let user_id = user_id.into_inner();
    let amount = body.amount;
    let idempotency_key = idempotency_key_header(&req);

    run_idempotent(
        idempotency_key.as_deref(),
        IdempotencyScope::Deposit,
        actix_web::http::StatusCode::CREATED,
        &pool,
        &time_source,
        || async {
            store::wallet::deposit(user_id, amount, idempotency_key.clone(), time_source.now(), &pool)
                .await
                .map_err(APIError::from)?;
            Ok(responses::SuccessMessage { status: "credited".into() })
        },
    )
    .await
}
