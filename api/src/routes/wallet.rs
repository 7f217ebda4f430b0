use actix_web::{get, web, HttpResponse};
use payloads::UserId;
use sqlx::PgPool;

use crate::error::APIError;
use crate::store;

#[tracing::instrument(skip(pool))]
#[get("/users/{user_id}/wallet")]
pub async fn get_wallet(
    user_id: web::Path<UserId>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    let wallet = store::wallet::get(user_id.into_inner(), &pool).await?;
    Ok(HttpResponse::Ok().json(wallet))
}
