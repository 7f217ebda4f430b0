use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAuction {
    pub title: String,
    pub total_items: i32,
    #[serde(default)]
    pub start_now: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Deposit {
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceBid {
    pub user_id: UserId,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Withdraw {
    pub user_id: UserId,
}
