pub mod api_client;
pub mod requests;
pub mod responses;

// The domain types live in `responses` (they double as what routes return
// over the wire) but are used pervasively by the store layer, so they're
// re-exported at the crate root for unqualified `payloads::Auction`-style
// access; `api_client.rs` still spells them out as `responses::Auction` for
// symmetry with `requests::*`.
pub use api_client::APIClient;
pub use responses::{
    Auction, AuctionConfig, AuctionView, Bid, CreateAuctionResponse, Leaderboard,
    LeaderboardEntry, RealtimeEvent, Round, SuccessMessage, Wallet, WalletLedgerEntry,
};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id type wrappers help ensure we don't mix up ids for different tables.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct UserId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct AuctionId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct RoundId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct BidId(pub Uuid);

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct WalletLedgerEntryId(pub Uuid);

/// A client-supplied idempotency key. Opaque to the server beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct IdempotencyKey(pub String);

/// Where an idempotency key lives; keys are only unique within a scope so the
/// same client-chosen key string can be reused across unrelated endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "use-sqlx",
    sqlx(type_name = "idempotency_scope", rename_all = "snake_case")
)]
pub enum IdempotencyScope {
    Deposit,
    PlaceBid,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "use-sqlx",
    sqlx(type_name = "auction_status", rename_all = "snake_case")
)]
pub enum AuctionStatus {
    Active,
    Processing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "use-sqlx",
    sqlx(type_name = "round_status", rename_all = "snake_case")
)]
pub enum RoundStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "use-sqlx",
    sqlx(type_name = "bid_status", rename_all = "snake_case")
)]
pub enum BidStatus {
    Active,
    Winning,
    Outbid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "use-sqlx",
    sqlx(type_name = "ledger_reason", rename_all = "snake_case")
)]
pub enum LedgerReason {
    Credit,
    Hold,
    Refund,
    Settle,
    Adjustment,
}
