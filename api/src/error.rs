//! The route-facing error taxonomy. Maps [`StoreError`] and a handful
//! of route-local conditions (rate limiting, idempotency collisions,
//! missing/invalid admin token) onto HTTP status + machine-readable code
//! pairs.
//!
//! A `thiserror`-derived enum implementing `ResponseError`, with a
//! `From<StoreError>` match arm per variant. The body carries a
//! `{"error": CODE, "message": ...}` structure since this surface has
//! external API consumers.

use actix_web::{body::BoxBody, HttpResponse, ResponseError};
use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum APIError {
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("invalid amount")]
    InvalidAmount,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("auction not found")]
    AuctionNotFound,
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
    #[error("bid is winning and its funds are locked")]
    WinningLocked,
    #[error("bid was already refunded")]
    AlreadyRefunded,
    #[error("a request with this idempotency key is already in progress")]
    IdempotencyInProgress,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("something went wrong")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl APIError {
    fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::AuctionNotFound => "AUCTION_NOT_FOUND",
            Self::BidNotFound => "BID_NOT_FOUND",
            Self::AuctionNotActive => "AUCTION_NOT_ACTIVE",
            Self::RoundNotActive => "ROUND_NOT_ACTIVE",
            Self::RoundEnded => "ROUND_ENDED",
            Self::BidTooLow { .. } => "BID_TOO_LOW",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::WinningLocked => "WINNING_LOCKED",
            Self::AlreadyRefunded => "ALREADY_REFUNDED",
            Self::IdempotencyInProgress => "IDEMPOTENCY_IN_PROGRESS",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl ResponseError for APIError {
    fn error_response(&self) -> HttpResponse<BoxBody> {
        let body = ErrorBody { error: self.code(), message: self.to_string() };
        match self {
            Self::ValidationError(_) | Self::InvalidAmount => {
                HttpResponse::BadRequest().json(body)
            }
            Self::Unauthorized => HttpResponse::Unauthorized().json(body),
            Self::Forbidden => HttpResponse::Forbidden().json(body),
            Self::AuctionNotFound | Self::BidNotFound => {
                HttpResponse::NotFound().json(body)
            }
            Self::AuctionNotActive
            | Self::RoundNotActive
            | Self::RoundEnded
            | Self::BidTooLow { .. }
            | Self::InsufficientFunds
            | Self::WinningLocked
            | Self::AlreadyRefunded
            | Self::IdempotencyInProgress => HttpResponse::Conflict().json(body),
            Self::RateLimited => HttpResponse::TooManyRequests().json(body),
            Self::Internal(_) => {
                tracing::error!("{self:#}");
                HttpResponse::InternalServerError().json(body)
            }
        }
    }
}

impl From<StoreError> for APIError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(_) => APIError::Internal(e.into()),
            StoreError::AuctionNotFound => APIError::AuctionNotFound,
            StoreError::RoundNotFound => APIError::AuctionNotFound,
            StoreError::BidNotFound => APIError::BidNotFound,
            StoreError::AuctionNotActive => APIError::AuctionNotActive,
            StoreError::RoundNotActive => APIError::RoundNotActive,
            StoreError::RoundEnded => APIError::RoundEnded,
            StoreError::BidTooLow { required } => APIError::BidTooLow { required },
            StoreError::InsufficientFunds => APIError::InsufficientFunds,
            StoreError::Forbidden => APIError::Forbidden,
            StoreError::WinningLocked => APIError::WinningLocked,
            StoreError::AlreadyRefunded => APIError::AlreadyRefunded,
            StoreError::InvalidAmount => APIError::InvalidAmount,
            StoreError::Validation(msg) => APIError::ValidationError(msg),
        }
    }
}
