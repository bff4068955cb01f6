//! Stateless translation of request documents into engine calls, one result
//! element per input child, in document order. A failing child never aborts
//! its siblings.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::OrderStatus;
use crate::protocol::{
    error_document, parse_request, render_results, CreateItem, Fill, Request, ResultItem,
    StatusState, TxItem,
};
use crate::services::matching::{ExecutionRecord, MatchingEngine};

pub struct Router {
    engine: Arc<MatchingEngine>,
}

impl Router {
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        Self { engine }
    }

    /// Handle one request document and produce the response document.
    pub async fn dispatch(&self, payload: &str) -> String {
        let results = match parse_request(payload) {
            Ok(Request::Create(items)) => self.handle_create(items).await,
            Ok(Request::Transactions { account_id, items }) => {
                self.handle_transactions(&account_id, items).await
            }
            Err(e) => {
                debug!("rejecting unparseable request: {e}");
                return error_document(&e.to_string());
            }
        };

        match render_results(&results) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!("failed to render response document: {e}");
                error_document("internal error")
            }
        }
    }

    async fn handle_create(&self, items: Vec<CreateItem>) -> Vec<ResultItem> {
        let mut results = Vec::new();
        for item in items {
            match item {
                CreateItem::Account { id, balance } => {
                    let attrs = vec![("id".to_string(), id.clone())];
                    match parse_number(&balance, "balance") {
                        Ok(balance) => match self.engine.create_account(&id, balance).await {
                            Ok(()) => results.push(ResultItem::CreatedAccount { id }),
                            Err(e) => results.push(error_item(attrs, e.to_string())),
                        },
                        Err(message) => results.push(error_item(attrs, message)),
                    }
                }
                CreateItem::Symbol { sym, allocations } => {
                    for allocation in allocations {
                        let attrs = vec![
                            ("sym".to_string(), sym.clone()),
                            ("id".to_string(), allocation.account_id.clone()),
                        ];
                        match parse_number(&allocation.quantity, "share quantity") {
                            Ok(quantity) => {
                                match self
                                    .engine
                                    .credit_shares(&allocation.account_id, &sym, quantity)
                                    .await
                                {
                                    Ok(()) => results.push(ResultItem::CreatedPosition {
                                        sym: sym.clone(),
                                        account_id: allocation.account_id,
                                    }),
                                    Err(e) => results.push(error_item(attrs, e.to_string())),
                                }
                            }
                            Err(message) => results.push(error_item(attrs, message)),
                        }
                    }
                }
            }
        }
        results
    }

    async fn handle_transactions(&self, account_id: &str, items: Vec<TxItem>) -> Vec<ResultItem> {
        // An unknown acting account fails every child, preserving order and
        // each child's identifying attributes.
        let gate = match self.engine.account_exists(account_id).await {
            Ok(true) => None,
            Ok(false) => Some(format!("Unknown account: {account_id}")),
            Err(e) => Some(e.to_string()),
        };

        let mut results = Vec::new();
        for item in items {
            if let Some(message) = &gate {
                results.push(error_item(echo_attrs(&item), message.clone()));
                continue;
            }
            results.push(self.handle_tx_item(account_id, item).await);
        }
        results
    }

    async fn handle_tx_item(&self, account_id: &str, item: TxItem) -> ResultItem {
        let attrs = echo_attrs(&item);
        match item {
            TxItem::Order { sym, amount, limit } => {
                let amount = match parse_number(&amount, "amount") {
                    Ok(v) => v,
                    Err(message) => return error_item(attrs, message),
                };
                let limit = match parse_number(&limit, "limit") {
                    Ok(v) => v,
                    Err(message) => return error_item(attrs, message),
                };
                match self.engine.place_order(account_id, &sym, amount, limit).await {
                    Ok(placed) => ResultItem::Opened {
                        sym: placed.symbol,
                        amount: placed.amount,
                        limit: placed.limit_price,
                        id: placed.id,
                    },
                    Err(e) => error_item(attrs, e.to_string()),
                }
            }
            TxItem::Cancel { id } => {
                let order_id = match parse_order_id(&id) {
                    Ok(v) => v,
                    Err(message) => return error_item(attrs, message),
                };
                match self.engine.cancel_order(order_id).await {
                    Ok(report) => ResultItem::Canceled {
                        id: report.order_id,
                        executions: fills(report.executions),
                        leftover: (report.leftover > Decimal::ZERO)
                            .then_some((report.leftover, report.canceled_at)),
                    },
                    Err(e) => error_item(attrs, e.to_string()),
                }
            }
            TxItem::Query { id } => {
                let order_id = match parse_order_id(&id) {
                    Ok(v) => v,
                    Err(message) => return error_item(attrs, message),
                };
                match self.engine.query_order(order_id).await {
                    Ok(report) => {
                        let state = match report.status {
                            OrderStatus::Open => StatusState::Open {
                                shares: report.open_shares,
                            },
                            OrderStatus::Canceled if report.open_shares > Decimal::ZERO => {
                                StatusState::Canceled {
                                    shares: report.open_shares,
                                    time: report.canceled_at.unwrap_or_default(),
                                }
                            }
                            _ => StatusState::Executed,
                        };
                        ResultItem::Status {
                            id: report.order_id,
                            state,
                            executions: fills(report.executions),
                        }
                    }
                    Err(e) => error_item(attrs, e.to_string()),
                }
            }
        }
    }
}

fn fills(executions: Vec<ExecutionRecord>) -> Vec<Fill> {
    executions
        .into_iter()
        .map(|e| Fill {
            shares: e.shares,
            price: e.price,
            time: e.time,
        })
        .collect()
}

fn echo_attrs(item: &TxItem) -> Vec<(String, String)> {
    match item {
        TxItem::Order { sym, amount, limit } => vec![
            ("sym".to_string(), sym.clone()),
            ("amount".to_string(), amount.clone()),
            ("limit".to_string(), limit.clone()),
        ],
        TxItem::Cancel { id } | TxItem::Query { id } => vec![("id".to_string(), id.clone())],
    }
}

fn error_item(attrs: Vec<(String, String)>, message: String) -> ResultItem {
    ResultItem::Error { attrs, message }
}

fn parse_number(text: &str, what: &str) -> Result<Decimal, String> {
    Decimal::from_str(text).map_err(|_| format!("malformed {what}: {text}"))
}

fn parse_order_id(text: &str) -> Result<i64, String> {
    text.parse::<i64>()
        .map_err(|_| format!("malformed order id: {text}"))
}
