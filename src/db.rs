//! Database connection and schema bootstrap.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Idempotent DDL, applied in order at startup.
const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE order_status AS ENUM ('open', 'executed', 'canceled');
    EXCEPTION
        WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id      TEXT PRIMARY KEY,
        balance NUMERIC NOT NULL CHECK (balance >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        account_id TEXT NOT NULL REFERENCES accounts(id),
        symbol     TEXT NOT NULL,
        quantity   NUMERIC NOT NULL CHECK (quantity >= 0),
        PRIMARY KEY (account_id, symbol)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id          BIGSERIAL PRIMARY KEY,
        account_id  TEXT NOT NULL REFERENCES accounts(id),
        symbol      TEXT NOT NULL,
        amount      NUMERIC NOT NULL CHECK (amount <> 0),
        limit_price NUMERIC NOT NULL CHECK (limit_price > 0),
        status      order_status NOT NULL DEFAULT 'open',
        created_at  BIGINT NOT NULL,
        canceled_at BIGINT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_book
        ON orders (symbol, status, limit_price, created_at, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id          BIGSERIAL PRIMARY KEY,
        order_id    BIGINT NOT NULL REFERENCES orders(id),
        shares      NUMERIC NOT NULL CHECK (shares > 0),
        price       NUMERIC NOT NULL CHECK (price > 0),
        executed_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_executions_order
        ON executions (order_id, executed_at, id)
    "#,
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the schema. Safe to run on every startup.
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("schema applied ({} statements)", SCHEMA_STATEMENTS.len());
        Ok(())
    }
}
