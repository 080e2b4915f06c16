use std::path::Path;

use rusqlite::Connection;

use neon_types::EvalError;

/// Opens the SQLite store connection with WAL pragmas and a busy timeout.
pub(super) fn open_store_connection(path: &Path) -> Result<Connection, EvalError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                EvalError::internal(format!(
                    "failed to create store root {}: {error}",
                    parent.display()
                ))
            })?;
        }
    }
    let connection = Connection::open(path).map_err(|error| {
        EvalError::internal(format!(
            "failed to open sqlite store {}: {error}",
            path.display()
        ))
    })?;
    configure_store_connection(&connection)?;
    Ok(connection)
}

pub(super) fn configure_store_connection(connection: &Connection) -> Result<(), EvalError> {
    connection
        .busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|error| EvalError::internal(format!("failed to set busy timeout: {error}")))?;
    connection
        .execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|error| EvalError::internal(format!("failed to configure sqlite: {error}")))?;
    Ok(())
}

/// Ensures tables and indexes exist before reads or writes.
pub(super) fn initialize_store_schema(connection: &Connection) -> Result<(), EvalError> {
    connection
        .execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                trace_tracking_uri TEXT,
                created_unix_ms INTEGER NOT NULL,
                updated_unix_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS suites (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                agent_id TEXT NOT NULL,
                config_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL,
                updated_unix_ms INTEGER NOT NULL,
                UNIQUE(project_id, name)
            );
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                suite_id TEXT NOT NULL REFERENCES suites(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                input_json TEXT NOT NULL,
                expected_tools_json TEXT,
                expected_tool_sequence_json TEXT,
                expected_output_contains_json TEXT,
                expected_output_pattern TEXT,
                scorers_json TEXT NOT NULL,
                scorer_config_json TEXT,
                min_score REAL NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                tags_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL,
                updated_unix_ms INTEGER NOT NULL,
                UNIQUE(suite_id, name)
            );
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                suite_id TEXT NOT NULL REFERENCES suites(id) ON DELETE CASCADE,
                agent_version TEXT,
                trigger TEXT NOT NULL,
                trigger_ref TEXT,
                status TEXT NOT NULL,
                config_json TEXT,
                summary_json TEXT,
                started_unix_ms INTEGER,
                completed_unix_ms INTEGER,
                created_unix_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS results (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                case_id TEXT NOT NULL,
                case_name TEXT NOT NULL,
                trace_run_id TEXT,
                trace_id TEXT,
                status TEXT NOT NULL,
                output_json TEXT,
                scores_json TEXT NOT NULL,
                score_details_json TEXT NOT NULL,
                passed INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                error TEXT,
                created_unix_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                key_prefix TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                scopes_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL,
                expires_unix_ms INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_runs_suite ON runs(suite_id);
            CREATE INDEX IF NOT EXISTS idx_runs_project_status ON runs(project_id, status);
            CREATE INDEX IF NOT EXISTS idx_runs_agent_version ON runs(agent_version);
            CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
            CREATE INDEX IF NOT EXISTS idx_results_case ON results(case_id);
            "#,
        )
        .map_err(|error| EvalError::internal(format!("failed to initialize schema: {error}")))?;
    Ok(())
}
