//! Foundational low-level utilities shared across Neon crates.
//!
//! Provides opaque identifier generation and the millisecond timestamp
//! helper used by run bookkeeping and store columns.

pub mod ids;
pub mod time_utils;

pub use ids::new_entity_id;
pub use time_utils::current_unix_timestamp_ms;
