use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use neon_core::{current_unix_timestamp_ms, new_entity_id};
use neon_types::{EvalError, Run, RunDraft, RunStatus, RunSummary, RunTrigger};

use super::rows::{encode_json_opt, map_store_error, run_from_row, to_unix_ms, RUN_COLUMNS};
use super::SqliteEvalStore;

impl SqliteEvalStore {
    /// Persists a pending run after verifying the suite belongs to the project.
    pub async fn create_run(
        &self,
        project_id: &str,
        suite_id: &str,
        trigger: RunTrigger,
        draft: &RunDraft,
    ) -> Result<Run, EvalError> {
        self.get_suite(project_id, suite_id).await?;
        let run_id = new_entity_id();
        {
            let connection = self.connection.lock().await;
            let now = current_unix_timestamp_ms() as i64;
            let config_json = encode_json_opt("run config", draft.config.as_ref())?;
            connection
                .execute(
                    "INSERT INTO runs (id, project_id, suite_id, agent_version, trigger, \
                     trigger_ref, status, config_json, created_unix_ms) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        run_id,
                        project_id,
                        suite_id,
                        draft.agent_version,
                        trigger.as_str(),
                        draft.trigger_ref,
                        RunStatus::Pending.as_str(),
                        config_json,
                        now
                    ],
                )
                .map_err(|error| map_store_error(error, &format!("run '{run_id}'")))?;
        }
        self.get_run(project_id, &run_id).await
    }

    pub async fn get_run(&self, project_id: &str, run_id: &str) -> Result<Run, EvalError> {
        let connection = self.connection.lock().await;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM runs r LEFT JOIN suites s ON s.id = r.suite_id \
                     WHERE r.id = ?1 AND r.project_id = ?2"
                ),
                params![run_id, project_id],
                |row| Ok(run_from_row(row)),
            )
            .optional()
            .map_err(|error| map_store_error(error, &format!("run '{run_id}'")))?;
        row.ok_or_else(|| EvalError::not_found(format!("run '{run_id}'")))?
    }

    /// Lists runs newest-first with the total matching count for pagination.
    pub async fn list_runs(
        &self,
        project_id: &str,
        suite_id: Option<&str>,
        status: Option<RunStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Run>, u64), EvalError> {
        let connection = self.connection.lock().await;
        let status_text = status.map(RunStatus::as_str);
        let mut statement = connection
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs r LEFT JOIN suites s ON s.id = r.suite_id \
                 WHERE r.project_id = ?1 \
                 AND (?2 IS NULL OR r.suite_id = ?2) \
                 AND (?3 IS NULL OR r.status = ?3) \
                 ORDER BY r.created_unix_ms DESC, r.rowid DESC LIMIT ?4 OFFSET ?5"
            ))
            .map_err(|error| map_store_error(error, "runs"))?;
        let rows = statement
            .query_map(
                params![project_id, suite_id, status_text, limit as i64, offset as i64],
                |row| Ok(run_from_row(row)),
            )
            .map_err(|error| map_store_error(error, "runs"))?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(|error| map_store_error(error, "runs"))??);
        }
        let total: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM runs WHERE project_id = ?1 \
                 AND (?2 IS NULL OR suite_id = ?2) AND (?3 IS NULL OR status = ?3)",
                params![project_id, suite_id, status_text],
                |row| row.get(0),
            )
            .map_err(|error| map_store_error(error, "runs"))?;
        Ok((runs, total.max(0) as u64))
    }

    pub async fn count_runs_since(
        &self,
        project_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, EvalError> {
        let connection = self.connection.lock().await;
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM runs WHERE project_id = ?1 AND created_unix_ms >= ?2",
                params![project_id, to_unix_ms(since)],
                |row| row.get(0),
            )
            .map_err(|error| map_store_error(error, "runs"))?;
        Ok(count.max(0) as u64)
    }

    /// Compare-and-set status transition.
    ///
    /// Returns true when the run moved from one of `from` to `to`. Entering
    /// `running` stamps `started_at`; entering a terminal state stamps
    /// `completed_at` and writes the summary when one is supplied. A false
    /// return means another writer won the race (e.g. a concurrent cancel).
    pub async fn transition_run(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
        summary: Option<&RunSummary>,
    ) -> Result<bool, EvalError> {
        let from_list = from
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let connection = self.connection.lock().await;
        let now = current_unix_timestamp_ms() as i64;
        let updated = if to == RunStatus::Running {
            connection
                .execute(
                    &format!(
                        "UPDATE runs SET status = ?1, started_unix_ms = ?2 \
                         WHERE id = ?3 AND status IN ({from_list})"
                    ),
                    params![to.as_str(), now, run_id],
                )
                .map_err(|error| map_store_error(error, &format!("run '{run_id}'")))?
        } else if to.is_terminal() {
            let summary_json = encode_json_opt("run summary", summary)?;
            connection
                .execute(
                    &format!(
                        "UPDATE runs SET status = ?1, completed_unix_ms = ?2, \
                         summary_json = COALESCE(?3, summary_json) \
                         WHERE id = ?4 AND status IN ({from_list})"
                    ),
                    params![to.as_str(), now, summary_json, run_id],
                )
                .map_err(|error| map_store_error(error, &format!("run '{run_id}'")))?
        } else {
            return Err(EvalError::invalid(format!(
                "cannot transition run to '{}'",
                to.as_str()
            )));
        };
        Ok(updated == 1)
    }

    /// Cancels a pending or running run. Returns false when the run already
    /// reached a terminal state; the terminal status is never overwritten.
    pub async fn cancel_run(&self, project_id: &str, run_id: &str) -> Result<bool, EvalError> {
        self.get_run(project_id, run_id).await?;
        let cancelled = self
            .transition_run(
                run_id,
                &[RunStatus::Pending, RunStatus::Running],
                RunStatus::Cancelled,
                None,
            )
            .await?;
        if cancelled {
            tracing::info!(run_id, "run cancelled");
        }
        Ok(cancelled)
    }
}
