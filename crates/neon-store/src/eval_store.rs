//! SQLite-backed evaluation store and its query surface.

use std::path::Path;

use rusqlite::Connection;
use tokio::sync::Mutex;

use neon_types::EvalError;

mod api_keys;
mod results;
mod rows;
mod runs;
mod schema;
mod stats;
mod suites;

/// Durable store for projects, suites, cases, runs, and results.
///
/// All queries are scoped by project; reads that cross a project boundary
/// fail with [`EvalError::NotFound`]. The connection is shared behind an
/// async mutex so callers suspend rather than block at the store boundary.
pub struct SqliteEvalStore {
    connection: Mutex<Connection>,
}

impl SqliteEvalStore {
    /// Opens (or creates) a store at `path` and ensures the schema exists.
    pub fn open(path: &Path) -> Result<Self, EvalError> {
        let connection = schema::open_store_connection(path)?;
        schema::initialize_store_schema(&connection)?;
        tracing::debug!(path = %path.display(), "opened sqlite eval store");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Opens an in-memory store. Used by tests and ephemeral CLI invocations.
    pub fn open_in_memory() -> Result<Self, EvalError> {
        let connection = Connection::open_in_memory()
            .map_err(|error| EvalError::internal(format!("failed to open sqlite store: {error}")))?;
        schema::configure_store_connection(&connection)?;
        schema::initialize_store_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}
