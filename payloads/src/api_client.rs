use crate::{AuctionId, BidId, IdempotencyKey, UserId, requests, responses};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Serialize;

type ReqwestResult = Result<reqwest::Response, reqwest::Error>;

/// An API client for interfacing with the backend.
pub struct APIClient {
    pub address: String,
    pub inner_client: reqwest::Client,
    /// Sent as `x-admin-token` on every request when set; harmless on
    /// non-admin routes, which ignore it.
    pub admin_token: Option<String>,
}

impl APIClient {
    pub fn new(address: String) -> Self {
        Self {
            address,
            inner_client: reqwest::Client::new(),
            admin_token: None,
        }
    }
}

/// Helper methods for http actions
impl APIClient {
    fn format_url(&self, path: &str) -> String {
        format!("{}/{path}", &self.address)
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> ReqwestResult {
        self.post_with_idempotency_key(path, body, None).await
    }

    async fn post_with_idempotency_key(
        &self,
        path: &str,
        body: &impl Serialize,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> ReqwestResult {
        let mut request = self.inner_client.post(self.format_url(path)).json(body);
        request = self.with_common_headers(request, idempotency_key);
        request.send().await
    }

    async fn empty_post(&self, path: &str) -> ReqwestResult {
        let request = self.inner_client.post(self.format_url(path));
        self.with_common_headers(request, None).send().await
    }

    async fn empty_get(&self, path: &str) -> ReqwestResult {
        let request = self.inner_client.get(self.format_url(path));
        self.with_common_headers(request, None).send().await
    }

    fn with_common_headers(
        &self,
        mut request: reqwest::RequestBuilder,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = &self.admin_token {
            request = request.header("x-admin-token", token);
        }
        if let Some(key) = idempotency_key {
            request = request.header("x-idempotency-key", key.0.clone());
        }
        request
    }
}

/// Methods on the backend API, one per row of the HTTP surface table.
impl APIClient {
    pub async fn health_check(&self) -> Result<(), ClientError> {
        let response = self.empty_get("health_check").await?;
        ok_empty(response).await
    }

    pub async fn create_auction(
        &self,
        details: &requests::CreateAuction,
    ) -> Result<responses::CreateAuctionResponse, ClientError> {
        let response = self.post("admin/auction", details).await?;
        ok_body(response).await
    }

    pub async fn start_auction(
        &self,
        auction_id: &AuctionId,
    ) -> Result<responses::Round, ClientError> {
        let response = self
            .empty_post(&format!("admin/auction/{auction_id}/start"))
            .await?;
        ok_body(response).await
    }

    pub async fn close_round(
        &self,
        round_id: &crate::RoundId,
    ) -> Result<responses::SuccessMessage, ClientError> {
        let response =
            self.empty_post(&format!("admin/round/{round_id}/close")).await?;
        ok_body(response).await
    }

    pub async fn stop_auction(
        &self,
        auction_id: &AuctionId,
    ) -> Result<responses::SuccessMessage, ClientError> {
        let response = self
            .empty_post(&format!("admin/auction/{auction_id}/stop"))
            .await?;
        ok_body(response).await
    }

    pub async fn deposit(
        &self,
        user_id: &UserId,
        amount: Decimal,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<responses::SuccessMessage, ClientError> {
        let response = self
            .post_with_idempotency_key(
                &format!("admin/users/{user_id}/deposit"),
                &requests::Deposit { amount },
                idempotency_key,
            )
            .await?;
        ok_body(response).await
    }

    pub async fn get_auction(
        &self,
        auction_id: &AuctionId,
    ) -> Result<responses::AuctionView, ClientError> {
        let response = self.empty_get(&format!("auction/{auction_id}")).await?;
        ok_body(response).await
    }

    pub async fn get_leaderboard(
        &self,
        auction_id: &AuctionId,
        limit: Option<u32>,
    ) -> Result<responses::Leaderboard, ClientError> {
        let path = match limit {
            Some(limit) => {
                format!("auction/{auction_id}/leaderboard?limit={limit}")
            }
            None => format!("auction/{auction_id}/leaderboard"),
        };
        let response = self.empty_get(&path).await?;
        ok_body(response).await
    }

    pub async fn place_bid(
        &self,
        auction_id: &AuctionId,
        user_id: UserId,
        amount: Decimal,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<responses::Bid, ClientError> {
        let response = self
            .post_with_idempotency_key(
                &format!("auction/{auction_id}/bid"),
                &requests::PlaceBid { user_id, amount },
                idempotency_key,
            )
            .await?;
        ok_body(response).await
    }

    pub async fn withdraw_bid(
        &self,
        bid_id: &BidId,
        user_id: UserId,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<responses::SuccessMessage, ClientError> {
        let response = self
            .post_with_idempotency_key(
                &format!("bid/{bid_id}/withdraw"),
                &requests::Withdraw { user_id },
                idempotency_key,
            )
            .await?;
        ok_body(response).await
    }

    pub async fn get_wallet(
        &self,
        user_id: &UserId,
    ) -> Result<responses::Wallet, ClientError> {
        let response =
            self.empty_get(&format!("users/{user_id}/wallet")).await?;
        ok_body(response).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An unhandled API error to display, containing response text.
    #[error("{1}")]
    APIError(StatusCode, String),
    #[error("Network error. Please check your connection.")]
    Network(#[from] reqwest::Error),
}

/// Deserialize a successful request into the desired type, or return an
/// appropriate error.
pub async fn ok_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::APIError(
            response.status(),
            response.text().await?,
        ));
    }
    Ok(response.json::<T>().await?)
}

/// Check that an empty response is OK, returning a ClientError if not.
pub async fn ok_empty(response: reqwest::Response) -> Result<(), ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::APIError(
            response.status(),
            response.text().await?,
        ));
    }
    Ok(())
}
