//! The matching engine. Owns the invariants tying cash, shares, orders, and
//! executions together; every state transition goes through here, inside a
//! single store transaction whose boundary belongs to the engine.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::settle::{self, FillSide};
use super::store::{self, StoreTx};
use super::types::{CancelReport, EngineError, ExecutionRecord, OrderReport, PlacedOrder};
use crate::models::{Order, OrderStatus};

/// Run one transactional attempt, retrying serialization conflicts and
/// deadlocks a bounded number of times.
macro_rules! transactional {
    ($op:literal, $attempt:expr) => {{
        let mut attempts = 0;
        loop {
            match $attempt {
                Err(e) if e.is_retryable() && attempts < MAX_TX_RETRIES => {
                    attempts += 1;
                    warn!(op = $op, attempts, "transaction conflict, retrying: {e}");
                }
                other => break other,
            }
        }
    }};
}

/// Bounded retry for serialization conflicts and deadlocks.
const MAX_TX_RETRIES: u32 = 3;

pub struct MatchingEngine {
    pool: PgPool,
}

impl MatchingEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------

    pub async fn create_account(&self, id: &str, balance: Decimal) -> Result<(), EngineError> {
        if balance < Decimal::ZERO {
            return Err(EngineError::InvalidRequest(format!(
                "initial balance must not be negative: {balance}"
            )));
        }

        transactional!("create_account", self.try_create_account(id, balance).await)
    }

    async fn try_create_account(&self, id: &str, balance: Decimal) -> Result<(), EngineError> {
        let mut tx = StoreTx::begin(&self.pool).await?;
        if !tx.insert_account(id, balance).await? {
            return Err(EngineError::DuplicateAccount(id.to_string()));
        }
        tx.commit().await?;
        info!(account = id, %balance, "account created");
        Ok(())
    }

    /// Credit shares of `symbol` to an account, creating the position row
    /// if absent.
    pub async fn credit_shares(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), EngineError> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidRequest(format!(
                "share credit must be positive: {quantity}"
            )));
        }

        transactional!(
            "credit_shares",
            self.try_credit_shares(account_id, symbol, quantity).await
        )
    }

    async fn try_credit_shares(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), EngineError> {
        let mut tx = StoreTx::begin(&self.pool).await?;
        tx.lock_account(account_id)
            .await?
            .ok_or_else(|| EngineError::UnknownAccount(account_id.to_string()))?;
        tx.credit_position(account_id, symbol, quantity).await?;
        tx.commit().await?;
        debug!(account = account_id, symbol, %quantity, "shares credited");
        Ok(())
    }

    /// Read-only guard used by the router before dispatching a
    /// `transactions` batch.
    pub async fn account_exists(&self, id: &str) -> Result<bool, EngineError> {
        Ok(store::account_exists(&self.pool, id).await?)
    }

    // ------------------------------------------------------------------
    // Order operations
    // ------------------------------------------------------------------

    /// Admit an order: reserve funds or shares, insert it OPEN, then walk
    /// the opposite side of the book. BUY if `amount` is positive, SELL if
    /// negative.
    pub async fn place_order(
        &self,
        account_id: &str,
        symbol: &str,
        amount: Decimal,
        limit_price: Decimal,
    ) -> Result<PlacedOrder, EngineError> {
        if amount.is_zero() {
            return Err(EngineError::InvalidRequest("order amount must be nonzero".into()));
        }
        if limit_price <= Decimal::ZERO {
            return Err(EngineError::InvalidRequest(format!(
                "limit price must be positive: {limit_price}"
            )));
        }

        transactional!(
            "place_order",
            self.try_place(account_id, symbol, amount, limit_price).await
        )
    }

    async fn try_place(
        &self,
        account_id: &str,
        symbol: &str,
        amount: Decimal,
        limit_price: Decimal,
    ) -> Result<PlacedOrder, EngineError> {
        let mut tx = StoreTx::begin(&self.pool).await?;

        let account = tx
            .lock_account(account_id)
            .await?
            .ok_or_else(|| EngineError::UnknownAccount(account_id.to_string()))?;

        let shares = amount.abs();
        if amount > Decimal::ZERO {
            // Buy: reserve the full cash up front; price improvement is
            // refunded fill by fill.
            let required = settle::buy_reservation(shares, limit_price);
            if account.balance < required {
                return Err(EngineError::InsufficientFunds {
                    required,
                    available: account.balance,
                });
            }
            tx.adjust_balance(account_id, -required).await?;
        } else {
            // Sell: reserve the shares.
            let held = tx
                .lock_position(account_id, symbol)
                .await?
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO);
            if held < shares {
                return Err(EngineError::InsufficientShares {
                    required: shares,
                    available: held,
                });
            }
            tx.debit_position(account_id, symbol, shares).await?;
        }

        let now = Utc::now().timestamp();
        let mut order = tx
            .insert_order(account_id, symbol, amount, limit_price, now)
            .await?;

        let remaining = self.match_incoming(&mut tx, &order).await?;
        if remaining.is_zero() {
            tx.set_order_status(order.id, OrderStatus::Executed).await?;
            order.status = OrderStatus::Executed;
        }

        tx.commit().await?;

        info!(
            order = order.id,
            account = account_id,
            symbol,
            %amount,
            limit = %limit_price,
            status = %order.status,
            "order placed"
        );

        Ok(PlacedOrder {
            id: order.id,
            account_id: order.account_id,
            symbol: order.symbol,
            amount: order.amount,
            limit_price: order.limit_price,
            status: order.status,
        })
    }

    /// Walk the opposite side of the book, best price first, filling at each
    /// counterparty's resting price. Returns the incoming order's remaining
    /// shares. Counterparty rows are locked one at a time, in book-priority
    /// order, and held until commit.
    async fn match_incoming(
        &self,
        tx: &mut StoreTx,
        incoming: &Order,
    ) -> Result<Decimal, EngineError> {
        let mut remaining = incoming.total_shares();

        while remaining > Decimal::ZERO {
            let Some(counter) = tx
                .best_counter_order(&incoming.symbol, incoming.side().opposite())
                .await?
            else {
                break;
            };

            let counter_open = counter.total_shares() - tx.filled_shares(counter.id).await?;
            if counter_open <= Decimal::ZERO {
                // Stale OPEN row for a fully-filled order; repair and move on.
                warn!(order = counter.id, "open order with no remaining shares, flagging executed");
                tx.set_order_status(counter.id, OrderStatus::Executed).await?;
                continue;
            }

            let incoming_slot = FillSide {
                order_id: incoming.id,
                limit_price: incoming.limit_price,
                created_at: incoming.created_at,
                open_shares: remaining,
            };
            let counter_slot = FillSide {
                order_id: counter.id,
                limit_price: counter.limit_price,
                created_at: counter.created_at,
                open_shares: counter_open,
            };
            let (buy_slot, sell_slot) = if incoming.is_buy() {
                (incoming_slot, counter_slot)
            } else {
                (counter_slot, incoming_slot)
            };

            // Price-time priority: if the best candidate does not cross, no
            // later resting order can.
            let Some(terms) = settle::fill_terms(&buy_slot, &sell_slot) else {
                break;
            };

            let now = Utc::now().timestamp();
            tx.insert_execution(incoming.id, terms.shares, terms.price, now)
                .await?;
            tx.insert_execution(counter.id, terms.shares, terms.price, now)
                .await?;

            // Settle each side independently. The seller's shares left its
            // position at reservation, so only cash moves to the seller.
            let (buyer, seller) = if incoming.is_buy() {
                (&incoming.account_id, &counter.account_id)
            } else {
                (&counter.account_id, &incoming.account_id)
            };
            tx.credit_position(buyer, &incoming.symbol, terms.shares)
                .await?;
            if terms.buyer_refund > Decimal::ZERO {
                tx.adjust_balance(buyer, terms.buyer_refund).await?;
            }
            tx.adjust_balance(seller, terms.seller_proceeds).await?;

            if counter_open == terms.shares {
                tx.set_order_status(counter.id, OrderStatus::Executed).await?;
            }

            remaining -= terms.shares;
            debug!(
                incoming = incoming.id,
                counter = counter.id,
                shares = %terms.shares,
                price = %terms.price,
                %remaining,
                "fill"
            );
        }

        Ok(remaining)
    }

    /// Cancel an OPEN order, refunding the reservation for the unfilled
    /// leftover only. Already-filled shares are never reversed.
    pub async fn cancel_order(&self, order_id: i64) -> Result<CancelReport, EngineError> {
        transactional!("cancel_order", self.try_cancel(order_id).await)
    }

    async fn try_cancel(&self, order_id: i64) -> Result<CancelReport, EngineError> {
        let mut tx = StoreTx::begin(&self.pool).await?;

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or(EngineError::UnknownOrder(order_id))?;
        if order.status != OrderStatus::Open {
            return Err(EngineError::NotCancellable(order_id, order.status));
        }

        let filled = tx.filled_shares(order_id).await?;
        let leftover = order.total_shares() - filled;

        if leftover > Decimal::ZERO {
            if order.is_buy() {
                // Refund at the order's own limit: that is what was reserved.
                tx.adjust_balance(
                    &order.account_id,
                    settle::buy_reservation(leftover, order.limit_price),
                )
                .await?;
            } else {
                tx.credit_position(&order.account_id, &order.symbol, leftover)
                    .await?;
            }
        }

        let now = Utc::now().timestamp();
        tx.mark_canceled(order_id, now).await?;
        let executions = tx.executions_for(order_id).await?;
        tx.commit().await?;

        info!(order = order_id, %leftover, "order canceled");

        Ok(CancelReport {
            order_id,
            executions: executions
                .into_iter()
                .map(|e| ExecutionRecord {
                    shares: e.shares,
                    price: e.price,
                    time: e.executed_at,
                })
                .collect(),
            leftover,
            canceled_at: now,
        })
    }

    /// Report an order's committed status, open shares, and execution
    /// history. Read-only.
    pub async fn query_order(&self, order_id: i64) -> Result<OrderReport, EngineError> {
        let mut tx = StoreTx::begin(&self.pool).await?;

        let order = tx
            .get_order(order_id)
            .await?
            .ok_or(EngineError::UnknownOrder(order_id))?;
        let executions = tx.executions_for(order_id).await?;
        tx.commit().await?;

        let filled: Decimal = executions.iter().map(|e| e.shares).sum();
        Ok(OrderReport {
            order_id,
            status: order.status,
            open_shares: order.total_shares() - filled,
            canceled_at: order.canceled_at,
            executions: executions
                .into_iter()
                .map(|e| ExecutionRecord {
                    shares: e.shares,
                    price: e.price,
                    time: e.executed_at,
                })
                .collect(),
        })
    }
}
