use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use neon_types::{round_to_places, DashboardStats, EvalError};

use super::rows::{map_store_error, to_unix_ms};
use super::SqliteEvalStore;

impl SqliteEvalStore {
    /// Computes every dashboard metric in a single SQL statement.
    ///
    /// Pass/fail classification reaches into the run summary JSON with
    /// `json_extract`; the trailing-seven-day count is a scalar subquery so no
    /// second round-trip is needed. `from`/`to` bound the main aggregates but
    /// never the weekly count.
    pub async fn aggregate_dashboard(
        &self,
        project_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<DashboardStats, EvalError> {
        let week_ago = to_unix_ms(Utc::now() - Duration::days(7));
        let from_ms = from.map(to_unix_ms);
        let to_ms = to.map(to_unix_ms);
        let connection = self.connection.lock().await;
        let (total_runs, passed_runs, failed_runs, avg_score, runs_this_week) = connection
            .query_row(
                "SELECT \
                     COUNT(*), \
                     COALESCE(SUM(CASE WHEN status = 'completed' AND summary_json IS NOT NULL \
                         AND CAST(json_extract(summary_json, '$.failed') AS INTEGER) = 0 \
                         AND CAST(json_extract(summary_json, '$.errored') AS INTEGER) = 0 \
                         THEN 1 ELSE 0 END), 0), \
                     COALESCE(SUM(CASE \
                         WHEN status = 'failed' THEN 1 \
                         WHEN status = 'completed' AND summary_json IS NOT NULL \
                             AND (CAST(json_extract(summary_json, '$.failed') AS INTEGER) > 0 \
                                 OR CAST(json_extract(summary_json, '$.errored') AS INTEGER) > 0) \
                         THEN 1 ELSE 0 END), 0), \
                     AVG(CASE WHEN status = 'completed' AND summary_json IS NOT NULL \
                         THEN CAST(json_extract(summary_json, '$.avg_score') AS REAL) END), \
                     (SELECT COUNT(*) FROM runs WHERE project_id = ?1 \
                         AND created_unix_ms >= ?2) \
                 FROM runs \
                 WHERE project_id = ?1 \
                     AND (?3 IS NULL OR created_unix_ms >= ?3) \
                     AND (?4 IS NULL OR created_unix_ms <= ?4)",
                params![project_id, week_ago, from_ms, to_ms],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .map_err(|error| map_store_error(error, "dashboard aggregation"))?;

        let total = total_runs.max(0) as u64;
        let passed = passed_runs.max(0) as u64;
        let failed = failed_runs.max(0) as u64;
        let (pass_rate, fail_rate) = if total > 0 {
            (
                round_to_places(passed as f64 / total as f64 * 100.0, 1),
                round_to_places(failed as f64 / total as f64 * 100.0, 1),
            )
        } else {
            (0.0, 0.0)
        };
        Ok(DashboardStats {
            total_runs: total,
            passed_runs: passed,
            failed_runs: failed,
            pass_rate,
            fail_rate,
            avg_score: round_to_places(avg_score.unwrap_or(0.0), 2),
            runs_this_week: runs_this_week.max(0) as u64,
        })
    }
}
