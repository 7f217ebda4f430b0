use jiff::Timestamp;
#[cfg(feature = "use-sqlx")]
use jiff_sqlx::Timestamp as SqlxTs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AuctionId, AuctionStatus, BidId, BidStatus, RoundId, RoundStatus, UserId,
    WalletLedgerEntryId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct Auction {
    pub id: AuctionId,
    pub title: String,
    pub total_items: i32,
    pub status: AuctionStatus,
    pub current_round_number: i32,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct Round {
    pub id: RoundId,
    pub auction_id: AuctionId,
    pub round_number: i32,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub start_time: Timestamp,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub end_time: Timestamp,
    pub status: RoundStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct Bid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub round_id: RoundId,
    pub amount: Decimal,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub timestamp: Timestamp,
    pub status: BidStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct Wallet {
    pub user_id: UserId,
    pub available_balance: Decimal,
    pub locked_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct WalletLedgerEntry {
    pub id: WalletLedgerEntryId,
    pub user_id: UserId,
    pub available_delta: Decimal,
    pub locked_delta: Decimal,
    pub reason: crate::LedgerReason,
    pub auction_id: Option<AuctionId>,
    pub round_id: Option<RoundId>,
    pub bid_id: Option<BidId>,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub created_at: Timestamp,
}

/// A single leaderboard row, the compact shape pushed over `leaderboard:update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: BidId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub bids: Vec<LeaderboardEntry>,
}

/// Configuration surfaced to clients alongside `GET /auction/:id` so they can
/// locally predict the minimum acceptable next bid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuctionConfig {
    pub min_bid_step_percent: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionView {
    pub auction: Auction,
    pub round: Option<Round>,
    pub config: AuctionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuctionResponse {
    pub auction: Auction,
    pub round: Option<Round>,
}

/// Generic `{"status": "..."}` body for admin/withdraw endpoints that don't
/// return an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessMessage {
    pub status: String,
}

/// Realtime event payloads. These are published on an in-process
/// `EventPublisher` (see `realtime.rs`); no wire transport is implemented
/// here, but the payload shapes are the ones a future transport adapter
/// would serialize verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    LeaderboardUpdate {
        auction_id: AuctionId,
        bids: Vec<LeaderboardEntry>,
    },
    RoundExtended {
        auction_id: AuctionId,
        round_id: RoundId,
        end_time: Timestamp,
    },
    RoundClosed {
        auction_id: AuctionId,
        round_id: RoundId,
        winners: Vec<Bid>,
    },
}
