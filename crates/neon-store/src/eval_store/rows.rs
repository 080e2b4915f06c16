use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use neon_types::{
    Case, CaseInput, CaseResult, EvalError, Project, ResultStatus, Run, RunStatus, RunSummary,
    RunTrigger, ScoreDetails, Suite, SuiteConfig,
};

/// Maps rusqlite failures onto the shared error taxonomy.
pub(super) fn map_store_error(error: rusqlite::Error, what: &str) -> EvalError {
    match &error {
        rusqlite::Error::QueryReturnedNoRows => EvalError::not_found(what.to_string()),
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            EvalError::conflict(what.to_string())
        }
        _ => EvalError::internal(format!("{what}: {error}")),
    }
}

pub(super) fn to_unix_ms(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

pub(super) fn from_unix_ms(unix_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(unix_ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(super) fn encode_json<T: Serialize>(field: &str, value: &T) -> Result<String, EvalError> {
    serde_json::to_string(value)
        .map_err(|error| EvalError::internal(format!("failed to encode {field}: {error}")))
}

pub(super) fn encode_json_opt<T: Serialize>(
    field: &str,
    value: Option<&T>,
) -> Result<Option<String>, EvalError> {
    value.map(|inner| encode_json(field, inner)).transpose()
}

pub(super) fn decode_json<T: DeserializeOwned>(field: &str, raw: &str) -> Result<T, EvalError> {
    serde_json::from_str(raw)
        .map_err(|error| EvalError::internal(format!("failed to decode {field}: {error}")))
}

pub(super) fn decode_json_opt<T: DeserializeOwned>(
    field: &str,
    raw: Option<String>,
) -> Result<Option<T>, EvalError> {
    raw.map(|inner| decode_json(field, &inner)).transpose()
}

pub(super) const PROJECT_COLUMNS: &str =
    "id, name, slug, trace_tracking_uri, created_unix_ms, updated_unix_ms";

pub(super) fn project_from_row(row: &Row<'_>) -> Result<Project, rusqlite::Error> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        trace_tracking_uri: row.get(3)?,
        created_at: from_unix_ms(row.get(4)?),
        updated_at: from_unix_ms(row.get(5)?),
    })
}

pub(super) const SUITE_COLUMNS: &str =
    "id, project_id, name, description, agent_id, config_json, created_unix_ms, updated_unix_ms";

pub(super) fn suite_from_row(row: &Row<'_>) -> Result<Suite, EvalError> {
    let config_json: String = row
        .get(5)
        .map_err(|error| map_store_error(error, "suite row"))?;
    let config: SuiteConfig = decode_json("suite config", &config_json)?;
    let read = |index: usize| -> Result<String, EvalError> {
        row.get(index)
            .map_err(|error| map_store_error(error, "suite row"))
    };
    Ok(Suite {
        id: read(0)?,
        project_id: read(1)?,
        name: read(2)?,
        description: row
            .get(3)
            .map_err(|error| map_store_error(error, "suite row"))?,
        agent_id: read(4)?,
        config,
        created_at: from_unix_ms(
            row.get(6)
                .map_err(|error| map_store_error(error, "suite row"))?,
        ),
        updated_at: from_unix_ms(
            row.get(7)
                .map_err(|error| map_store_error(error, "suite row"))?,
        ),
    })
}

/// Case columns, prefixed for queries that join `cases c` against `suites s`.
pub(super) const CASE_COLUMNS: &str = "c.id, c.suite_id, c.name, c.description, c.input_json, \
     c.expected_tools_json, c.expected_tool_sequence_json, c.expected_output_contains_json, \
     c.expected_output_pattern, c.scorers_json, c.scorer_config_json, c.min_score, \
     c.timeout_seconds, c.tags_json, c.created_unix_ms, c.updated_unix_ms";

pub(super) fn case_from_row(row: &Row<'_>) -> Result<Case, EvalError> {
    let fail = |error: rusqlite::Error| map_store_error(error, "case row");
    let input_json: String = row.get(4).map_err(fail)?;
    let input: CaseInput = decode_json("case input", &input_json)?;
    let expected_tools = decode_json_opt("expected_tools", row.get(5).map_err(fail)?)?;
    let expected_tool_sequence =
        decode_json_opt("expected_tool_sequence", row.get(6).map_err(fail)?)?;
    let expected_output_contains =
        decode_json_opt("expected_output_contains", row.get(7).map_err(fail)?)?;
    let scorers_json: String = row.get(9).map_err(fail)?;
    let scorer_config = decode_json_opt("scorer_config", row.get(10).map_err(fail)?)?;
    let tags_json: String = row.get(13).map_err(fail)?;
    Ok(Case {
        id: row.get(0).map_err(fail)?,
        suite_id: row.get(1).map_err(fail)?,
        name: row.get(2).map_err(fail)?,
        description: row.get(3).map_err(fail)?,
        input,
        expected_tools,
        expected_tool_sequence,
        expected_output_contains,
        expected_output_pattern: row.get(8).map_err(fail)?,
        scorers: decode_json("case scorers", &scorers_json)?,
        scorer_config,
        min_score: row.get(11).map_err(fail)?,
        timeout_seconds: row.get::<_, i64>(12).map_err(fail)?.max(0) as u64,
        tags: decode_json("case tags", &tags_json)?,
        created_at: from_unix_ms(row.get(14).map_err(fail)?),
        updated_at: from_unix_ms(row.get(15).map_err(fail)?),
    })
}

/// Run columns joined against the suite table for display names.
pub(super) const RUN_COLUMNS: &str = "r.id, r.project_id, r.suite_id, s.name, r.agent_version, \
     r.trigger, r.trigger_ref, r.status, r.config_json, r.summary_json, r.started_unix_ms, \
     r.completed_unix_ms, r.created_unix_ms";

pub(super) fn run_from_row(row: &Row<'_>) -> Result<Run, EvalError> {
    let fail = |error: rusqlite::Error| map_store_error(error, "run row");
    let trigger_raw: String = row.get(5).map_err(fail)?;
    let trigger = RunTrigger::parse(&trigger_raw)
        .ok_or_else(|| EvalError::internal(format!("corrupt run trigger '{trigger_raw}'")))?;
    let status_raw: String = row.get(7).map_err(fail)?;
    let status = RunStatus::parse(&status_raw)
        .ok_or_else(|| EvalError::internal(format!("corrupt run status '{status_raw}'")))?;
    let summary: Option<RunSummary> = decode_json_opt("run summary", row.get(9).map_err(fail)?)?;
    Ok(Run {
        id: row.get(0).map_err(fail)?,
        project_id: row.get(1).map_err(fail)?,
        suite_id: row.get(2).map_err(fail)?,
        suite_name: row.get(3).map_err(fail)?,
        agent_version: row.get(4).map_err(fail)?,
        trigger,
        trigger_ref: row.get(6).map_err(fail)?,
        status,
        config: decode_json_opt("run config", row.get(8).map_err(fail)?)?,
        summary,
        started_at: row
            .get::<_, Option<i64>>(10)
            .map_err(fail)?
            .map(from_unix_ms),
        completed_at: row
            .get::<_, Option<i64>>(11)
            .map_err(fail)?
            .map(from_unix_ms),
        created_at: from_unix_ms(row.get(12).map_err(fail)?),
    })
}

pub(super) const RESULT_COLUMNS: &str = "id, run_id, case_id, case_name, trace_run_id, trace_id, \
     status, output_json, scores_json, score_details_json, passed, execution_time_ms, error, \
     created_unix_ms";

pub(super) fn result_from_row(row: &Row<'_>) -> Result<CaseResult, EvalError> {
    let fail = |error: rusqlite::Error| map_store_error(error, "result row");
    let status_raw: String = row.get(6).map_err(fail)?;
    let status = ResultStatus::parse(&status_raw)
        .ok_or_else(|| EvalError::internal(format!("corrupt result status '{status_raw}'")))?;
    let scores_json: String = row.get(8).map_err(fail)?;
    let score_details_json: String = row.get(9).map_err(fail)?;
    let score_details: ScoreDetails = decode_json("score details", &score_details_json)?;
    Ok(CaseResult {
        id: row.get(0).map_err(fail)?,
        run_id: row.get(1).map_err(fail)?,
        case_id: row.get(2).map_err(fail)?,
        case_name: row.get(3).map_err(fail)?,
        trace_run_id: row.get(4).map_err(fail)?,
        trace_id: row.get(5).map_err(fail)?,
        status,
        output: decode_json_opt("result output", row.get(7).map_err(fail)?)?,
        scores: decode_json("result scores", &scores_json)?,
        score_details,
        passed: row.get::<_, i64>(10).map_err(fail)? != 0,
        execution_time_ms: row.get::<_, i64>(11).map_err(fail)?.max(0) as u64,
        error: row.get(12).map_err(fail)?,
        created_at: from_unix_ms(row.get(13).map_err(fail)?),
    })
}
