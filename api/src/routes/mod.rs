pub mod admin;
pub mod auction;
pub mod wallet;

use actix_web::{dev::HttpServiceFactory, get, http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use std::future::Future;

use crate::error::APIError;
use crate::store::{self, idempotency::Lookup};
use crate::time::TimeSource;
use payloads::IdempotencyScope;
use sqlx::PgPool;

pub fn api_services() -> impl HttpServiceFactory {
    web::scope("")
        .service(health_check)
        .service(admin::create_auction)
        .service(admin::start_auction)
        .service(admin::close_round)
        .service(admin::stop_auction)
        .service(admin::deposit)
        .service(auction::get_auction)
        .service(auction::get_leaderboard)
        .service(auction::place_bid)
        .service(auction::withdraw_bid)
        .service(wallet::get_wallet)
}

#[get("/health_check")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("healthy")
}

pub(crate) fn idempotency_key_header(req: &HttpRequest) -> Option<String> {
    req.headers().get("x-idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Wraps a use case in the idempotency envelope when the caller sent
/// `x-idempotency-key`. Without the header, `work` just runs once and the
/// result is wrapped in `success_status`. With the header, a repeated
/// request for the same key replays the first response verbatim instead of
/// re-running `work` (which would double-charge a deposit or place a
/// duplicate bid); a request still in flight gets `IdempotencyInProgress`.
pub(crate) async fn run_idempotent<F, Fut, T>(
    idempotency_key: Option<&str>,
    scope: IdempotencyScope,
    success_status: StatusCode,
    pool: &PgPool,
    time_source: &TimeSource,
    work: F,
) -> Result<HttpResponse, APIError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, APIError>>,
    T: serde::Serialize,
{
    let Some(key) = idempotency_key else {
        let result = work().await?;
        return Ok(HttpResponse::build(success_status).json(result));
    };

    match store::idempotency::begin(key, scope, time_source.now(), pool).await? {
        Lookup::Finalized { status_code, response_body } => {
            let status = StatusCode::from_u16(status_code as u16).unwrap_or(StatusCode::OK);
            Ok(HttpResponse::build(status).json(response_body))
        }
        Lookup::InProgress => Err(APIError::IdempotencyInProgress),
        Lookup::Fresh => match work().await {
            Ok(result) => {
                let body = serde_json::to_value(&result).map_err(|e| APIError::Internal(e.into()))?;
                store::idempotency::finalize(key, scope, success_status.as_u16() as i32, body.clone(), pool)
                    .await?;
                Ok(HttpResponse::build(success_status).json(body))
            }
            Err(e) => {
                let _ = store::idempotency::abandon(key, scope, pool).await;
                Err(e)
            }
        },
    }
}
