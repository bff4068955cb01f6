use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A funded trading account. `balance` is held at 2-decimal monetary
/// precision and never goes negative; buy reservations debit it up front.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: String,
    pub balance: Decimal,
}

/// Shares of one symbol held by one account. Short positions are forbidden,
/// so `quantity` never goes negative; sell reservations debit it up front.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub account_id: String,
    pub symbol: String,
    pub quantity: Decimal,
}
