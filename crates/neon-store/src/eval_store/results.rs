use rusqlite::params;

use neon_types::{CaseResult, EvalError};

use super::rows::{encode_json, encode_json_opt, map_store_error, result_from_row, to_unix_ms,
    RESULT_COLUMNS};
use super::SqliteEvalStore;

impl SqliteEvalStore {
    /// Persists one case result. Each result write is its own transaction so
    /// parallel cases never block each other on the store.
    pub async fn insert_result(&self, result: &CaseResult) -> Result<(), EvalError> {
        let connection = self.connection.lock().await;
        connection
            .execute(
                "INSERT INTO results (id, run_id, case_id, case_name, trace_run_id, trace_id, \
                 status, output_json, scores_json, score_details_json, passed, \
                 execution_time_ms, error, created_unix_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    result.id,
                    result.run_id,
                    result.case_id,
                    result.case_name,
                    result.trace_run_id,
                    result.trace_id,
                    result.status.as_str(),
                    encode_json_opt("result output", result.output.as_ref())?,
                    encode_json("result scores", &result.scores)?,
                    encode_json("score details", &result.score_details)?,
                    result.passed as i64,
                    result.execution_time_ms as i64,
                    result.error,
                    to_unix_ms(result.created_at)
                ],
            )
            .map_err(|error| map_store_error(error, &format!("result '{}'", result.id)))?;
        Ok(())
    }

    /// Returns results for a run in insertion order, optionally only failures.
    pub async fn list_results(
        &self,
        project_id: &str,
        run_id: &str,
        failed_only: bool,
    ) -> Result<Vec<CaseResult>, EvalError> {
        self.get_run(project_id, run_id).await?;
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM results WHERE run_id = ?1 \
                 AND (?2 = 0 OR passed = 0) \
                 ORDER BY created_unix_ms ASC, rowid ASC"
            ))
            .map_err(|error| map_store_error(error, "results"))?;
        let rows = statement
            .query_map(params![run_id, failed_only as i64], |row| {
                Ok(result_from_row(row))
            })
            .map_err(|error| map_store_error(error, "results"))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|error| map_store_error(error, "results"))??);
        }
        Ok(results)
    }
}
