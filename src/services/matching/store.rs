//! The store contract required by the matching engine: row-locked reads and
//! CRUD for accounts, positions, orders, and executions, all scoped to one
//! transaction. The book has no in-memory representation; it *is* the set of
//! OPEN order rows, and the best-counter query below is its only read path.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{Account, Execution, Order, OrderStatus, Position, Side};

const ORDER_COLUMNS: &str =
    "id, account_id, symbol, amount, limit_price, status, created_at, canceled_at";

/// A single engine transaction. Dropped without `commit`, it rolls back.
pub struct StoreTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx {
    pub async fn begin(pool: &PgPool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Row-lock and fetch an account.
    pub async fn lock_account(&mut self, id: &str) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>("SELECT id, balance FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
    }

    /// Insert an account; returns false when the id is already taken.
    pub async fn insert_account(
        &mut self,
        id: &str,
        balance: Decimal,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("INSERT INTO accounts (id, balance) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                .bind(id)
                .bind(balance)
                .execute(&mut *self.tx)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Apply a signed delta to an account balance. The UPDATE itself takes
    /// the row lock, so read-modify-write is atomic.
    pub async fn adjust_balance(&mut self, id: &str, delta: Decimal) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET balance = balance + $2 WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    pub async fn lock_position(
        &mut self,
        account_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, sqlx::Error> {
        sqlx::query_as::<_, Position>(
            "SELECT account_id, symbol, quantity FROM positions
             WHERE account_id = $1 AND symbol = $2 FOR UPDATE",
        )
        .bind(account_id)
        .bind(symbol)
        .fetch_optional(&mut *self.tx)
        .await
    }

    /// Credit shares, creating the position row if absent.
    pub async fn credit_position(
        &mut self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO positions (account_id, symbol, quantity) VALUES ($1, $2, $3)
             ON CONFLICT (account_id, symbol)
             DO UPDATE SET quantity = positions.quantity + EXCLUDED.quantity",
        )
        .bind(account_id)
        .bind(symbol)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn debit_position(
        &mut self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE positions SET quantity = quantity - $3
             WHERE account_id = $1 AND symbol = $2",
        )
        .bind(account_id)
        .bind(symbol)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Insert an OPEN order; the store assigns the monotonic id.
    pub async fn insert_order(
        &mut self,
        account_id: &str,
        symbol: &str,
        amount: Decimal,
        limit_price: Decimal,
        created_at: i64,
    ) -> Result<Order, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (account_id, symbol, amount, limit_price, status, created_at)
             VALUES ($1, $2, $3, $4, 'open', $5)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(account_id)
        .bind(symbol)
        .bind(amount)
        .bind(limit_price)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
    }

    pub async fn lock_order(&mut self, id: i64) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    pub async fn get_order(&mut self, id: i64) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    pub async fn set_order_status(
        &mut self,
        id: i64,
        status: OrderStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn mark_canceled(&mut self, id: i64, canceled_at: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE orders SET status = 'canceled', canceled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(canceled_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Lock and return the best resting order on `book_side` of the symbol:
    /// best price first (descending bids, ascending asks), then earliest
    /// `created_at`, then lowest id. This ordering is the global lock
    /// priority for counterparties; only one is held at a time.
    pub async fn best_counter_order(
        &mut self,
        symbol: &str,
        book_side: Side,
    ) -> Result<Option<Order>, sqlx::Error> {
        let sql = match book_side {
            Side::Sell => format!(
                "SELECT {ORDER_COLUMNS} FROM orders
                 WHERE symbol = $1 AND status = 'open' AND amount < 0
                 ORDER BY limit_price ASC, created_at ASC, id ASC
                 LIMIT 1 FOR UPDATE"
            ),
            Side::Buy => format!(
                "SELECT {ORDER_COLUMNS} FROM orders
                 WHERE symbol = $1 AND status = 'open' AND amount > 0
                 ORDER BY limit_price DESC, created_at ASC, id ASC
                 LIMIT 1 FOR UPDATE"
            ),
        };
        sqlx::query_as::<_, Order>(&sql)
            .bind(symbol)
            .fetch_optional(&mut *self.tx)
            .await
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Append-only; no read lock required.
    pub async fn insert_execution(
        &mut self,
        order_id: i64,
        shares: Decimal,
        price: Decimal,
        executed_at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO executions (order_id, shares, price, executed_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(order_id)
        .bind(shares)
        .bind(price)
        .bind(executed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Sum of filled shares for an order.
    pub async fn filled_shares(&mut self, order_id: i64) -> Result<Decimal, sqlx::Error> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(shares), 0) FROM executions WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_one(&mut *self.tx)
        .await
    }

    /// Executions ascending by time, ties by insertion order.
    pub async fn executions_for(&mut self, order_id: i64) -> Result<Vec<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>(
            "SELECT id, order_id, shares, price, executed_at FROM executions
             WHERE order_id = $1 ORDER BY executed_at ASC, id ASC",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
    }
}

/// Read-only existence check used by the router's `transactions` gate.
pub async fn account_exists(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}
