//! Engine error sum and the reports returned to the router.

use rust_decimal::Decimal;
use crate::models::OrderStatus;

/// Matching engine errors. Every engine operation returns one of these;
/// the router maps each to a single `<error>` element.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(i64),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Insufficient shares: required {required}, available {available}")]
    InsufficientShares {
        required: Decimal,
        available: Decimal,
    },

    #[error("Order {0} cannot be canceled (status: {1})")]
    NotCancellable(i64, OrderStatus),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    /// Serialization conflicts and deadlocks are the only retryable
    /// failures; the engine retries them a bounded number of times before
    /// surfacing the storage error.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

/// Result of a placement, echoed back as `<opened>`.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub id: i64,
    pub account_id: String,
    pub symbol: String,
    pub amount: Decimal,
    pub limit_price: Decimal,
    pub status: OrderStatus,
}

/// One execution as reported to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub shares: Decimal,
    pub price: Decimal,
    pub time: i64,
}

/// Result of a cancel: the fills that already happened plus the leftover
/// that was refunded.
#[derive(Debug, Clone)]
pub struct CancelReport {
    pub order_id: i64,
    pub executions: Vec<ExecutionRecord>,
    pub leftover: Decimal,
    pub canceled_at: i64,
}

/// Result of a query: committed status, open shares, and the execution
/// history in ascending time order.
#[derive(Debug, Clone)]
pub struct OrderReport {
    pub order_id: i64,
    pub status: OrderStatus,
    pub open_shares: Decimal,
    pub canceled_at: Option<i64>,
    pub executions: Vec<ExecutionRecord>,
}
