//! Durable persistence for Neon evaluation state.
//!
//! Backed by SQLite through `rusqlite` with WAL journaling. Entity payloads
//! that the dashboard never filters on are stored as JSON columns and decoded
//! at this boundary; dashboard aggregation reaches into the run summary JSON
//! with `json_extract` so all metrics come back in one round-trip.

mod eval_store;

pub use eval_store::SqliteEvalStore;
