use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Sign convention: positive amount = BUY, negative = SELL.
    pub fn of_amount(amount: Decimal) -> Self {
        if amount.is_sign_positive() {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Active in the book; remaining shares are always > 0 while open.
    Open,
    /// Fully filled. Terminal.
    Executed,
    /// Explicitly canceled. Terminal.
    Canceled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Executed => write!(f, "executed"),
            OrderStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// A persisted order row. `amount` keeps its original signed value for the
/// life of the order; remaining shares are always derived as
/// `|amount| - sum(executions.shares)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub account_id: String,
    pub symbol: String,
    pub amount: Decimal,
    pub limit_price: Decimal,
    pub status: OrderStatus,
    /// Epoch seconds, assigned on insert.
    pub created_at: i64,
    /// Epoch seconds, set once when the order is canceled.
    pub canceled_at: Option<i64>,
}

impl Order {
    pub fn side(&self) -> Side {
        Side::of_amount(self.amount)
    }

    pub fn is_buy(&self) -> bool {
        self.side() == Side::Buy
    }

    /// Original total shares, side-independent.
    pub fn total_shares(&self) -> Decimal {
        self.amount.abs()
    }
}

/// One matched quantity at one price, recorded against a single order.
/// A fill produces two of these, one per matched order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: i64,
    pub order_id: i64,
    pub shares: Decimal,
    pub price: Decimal,
    pub executed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_follows_amount_sign() {
        assert_eq!(Side::of_amount(dec!(100)), Side::Buy);
        assert_eq!(Side::of_amount(dec!(-100)), Side::Sell);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn total_shares_is_magnitude() {
        let order = Order {
            id: 1,
            account_id: "a".into(),
            symbol: "TEST".into(),
            amount: dec!(-250),
            limit_price: dec!(45),
            status: OrderStatus::Open,
            created_at: 0,
            canceled_at: None,
        };
        assert_eq!(order.total_shares(), dec!(250));
        assert_eq!(order.side(), Side::Sell);
    }
}
