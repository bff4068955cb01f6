//! Price-time priority matching over the transactional store.
//!
//! There is no in-memory book: the book is the set of OPEN order rows, and
//! every operation (place, cancel, query) runs in exactly one store
//! transaction owned by the engine. Workers share no mutable state in
//! process; concurrency discipline is the store's row locks, acquired in
//! book-priority order.

mod engine;
mod settle;
mod store;
mod types;

pub use engine::MatchingEngine;
pub use types::{CancelReport, EngineError, ExecutionRecord, OrderReport, PlacedOrder};
