use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use neon_types::{
    ApiKeyScope, Case, CaseDraft, CaseResult, CompareReport, DashboardStats, RequestContext, Run,
    RunDraft, RunStatus, RunTrigger, Suite, SuiteDraft,
};

use crate::error::ApiError;
use crate::server::GatewayState;

fn default_list_limit() -> u32 {
    50
}

fn default_threshold() -> f64 {
    0.05
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListRunsQuery {
    #[serde(default)]
    suite_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunResultsQuery {
    #[serde(default)]
    failed_only: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashboardQuery {
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompareBody {
    baseline_id: String,
    candidate_id: String,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

/// Resolves the bearer token and enforces the required scope.
async fn authorize(
    state: &GatewayState,
    headers: &HeaderMap,
    scope: ApiKeyScope,
) -> Result<RequestContext, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    let context = state.authenticator.authenticate(token).await?;
    if !context.has_scope(scope) {
        return Err(ApiError::forbidden(format!(
            "scope '{}' required",
            scope.as_str()
        )));
    }
    Ok(context)
}

pub(crate) async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn handle_list_suites(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Suite>>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(state.store.list_suites(&context.project_id).await?))
}

pub(crate) async fn handle_create_suite(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(draft): Json<SuiteDraft>,
) -> Result<Json<Suite>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Write).await?;
    Ok(Json(
        state.store.create_suite(&context.project_id, &draft).await?,
    ))
}

pub(crate) async fn handle_get_suite(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(suite_id): Path<String>,
) -> Result<Json<Suite>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state.store.get_suite(&context.project_id, &suite_id).await?,
    ))
}

pub(crate) async fn handle_update_suite(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(suite_id): Path<String>,
    Json(draft): Json<SuiteDraft>,
) -> Result<Json<Suite>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Write).await?;
    Ok(Json(
        state
            .store
            .update_suite(&context.project_id, &suite_id, &draft)
            .await?,
    ))
}

pub(crate) async fn handle_delete_suite(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(suite_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Write).await?;
    state
        .store
        .delete_suite(&context.project_id, &suite_id)
        .await?;
    Ok(Json(json!({ "deleted": true })))
}

pub(crate) async fn handle_list_cases(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(suite_id): Path<String>,
) -> Result<Json<Vec<Case>>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state
            .store
            .list_cases(&context.project_id, &suite_id)
            .await?,
    ))
}

pub(crate) async fn handle_create_case(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(suite_id): Path<String>,
    Json(draft): Json<CaseDraft>,
) -> Result<Json<Case>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Write).await?;
    Ok(Json(
        state
            .store
            .create_case(&context.project_id, &suite_id, &draft)
            .await?,
    ))
}

pub(crate) async fn handle_get_case(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(case_id): Path<String>,
) -> Result<Json<Case>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state.store.get_case(&context.project_id, &case_id).await?,
    ))
}

pub(crate) async fn handle_update_case(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(case_id): Path<String>,
    Json(draft): Json<CaseDraft>,
) -> Result<Json<Case>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Write).await?;
    Ok(Json(
        state
            .store
            .update_case(&context.project_id, &case_id, &draft)
            .await?,
    ))
}

pub(crate) async fn handle_delete_case(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(case_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Write).await?;
    state
        .store
        .delete_case(&context.project_id, &case_id)
        .await?;
    Ok(Json(json!({ "deleted": true })))
}

/// Creates a run and schedules its execution in the background; the pending
/// run is returned immediately.
pub(crate) async fn handle_create_run(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(suite_id): Path<String>,
    Json(draft): Json<RunDraft>,
) -> Result<Json<Run>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Execute).await?;
    let run = state
        .orchestrator
        .create_run(&context.project_id, &suite_id, RunTrigger::Api, &draft)
        .await?;

    let orchestrator = state.orchestrator.clone();
    let project_id = context.project_id.clone();
    let run_id = run.id.clone();
    tokio::spawn(async move {
        if let Err(error) = orchestrator.start_execution(&project_id, &run_id, None).await {
            tracing::error!(%run_id, %error, "background run execution failed");
        }
    });

    Ok(Json(run))
}

pub(crate) async fn handle_list_runs(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            RunStatus::parse(raw)
                .ok_or_else(|| ApiError::unprocessable(format!("unknown run status '{raw}'")))
        })
        .transpose()?;
    let (items, total) = state
        .store
        .list_runs(
            &context.project_id,
            query.suite_id.as_deref(),
            status,
            query.limit.min(200),
            query.offset,
        )
        .await?;
    Ok(Json(json!({
        "items": items,
        "total": total,
        "limit": query.limit.min(200),
        "offset": query.offset,
    })))
}

pub(crate) async fn handle_get_run(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state.store.get_run(&context.project_id, &run_id).await?,
    ))
}

pub(crate) async fn handle_get_run_results(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(query): Query<RunResultsQuery>,
) -> Result<Json<Vec<CaseResult>>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state
            .store
            .list_results(&context.project_id, &run_id, query.failed_only)
            .await?,
    ))
}

pub(crate) async fn handle_cancel_run(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Execute).await?;
    let cancelled = state
        .orchestrator
        .cancel_run(&context.project_id, &run_id)
        .await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

pub(crate) async fn handle_compare(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<CompareBody>,
) -> Result<Json<CompareReport>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state
            .comparator
            .compare(
                &context.project_id,
                &body.baseline_id,
                &body.candidate_id,
                body.threshold,
            )
            .await?,
    ))
}

pub(crate) async fn handle_dashboard(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardStats>, ApiError> {
    let context = authorize(&state, &headers, ApiKeyScope::Read).await?;
    Ok(Json(
        state
            .store
            .aggregate_dashboard(&context.project_id, query.from, query.to)
            .await?,
    ))
}
