use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

use neon_compare::RunComparator;
use neon_runner::RunOrchestrator;
use neon_store::SqliteEvalStore;

use crate::auth::ApiKeyAuthenticator;
use crate::handlers;

/// Shared state handed to every gateway handler.
pub struct GatewayState {
    pub store: Arc<SqliteEvalStore>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub comparator: RunComparator,
    pub authenticator: Arc<dyn ApiKeyAuthenticator>,
}

impl GatewayState {
    pub fn new(
        store: Arc<SqliteEvalStore>,
        orchestrator: Arc<RunOrchestrator>,
        authenticator: Arc<dyn ApiKeyAuthenticator>,
    ) -> Self {
        let comparator = RunComparator::new(store.clone());
        Self {
            store,
            orchestrator,
            comparator,
            authenticator,
        }
    }
}

/// Builds the versioned API router.
pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::handle_health))
        .route(
            "/api/v1/suites",
            get(handlers::handle_list_suites).post(handlers::handle_create_suite),
        )
        .route(
            "/api/v1/suites/{suite_id}",
            get(handlers::handle_get_suite)
                .put(handlers::handle_update_suite)
                .delete(handlers::handle_delete_suite),
        )
        .route(
            "/api/v1/suites/{suite_id}/cases",
            get(handlers::handle_list_cases).post(handlers::handle_create_case),
        )
        .route(
            "/api/v1/cases/{case_id}",
            get(handlers::handle_get_case)
                .put(handlers::handle_update_case)
                .delete(handlers::handle_delete_case),
        )
        .route(
            "/api/v1/suites/{suite_id}/runs",
            post(handlers::handle_create_run),
        )
        .route("/api/v1/runs", get(handlers::handle_list_runs))
        .route("/api/v1/runs/{run_id}", get(handlers::handle_get_run))
        .route(
            "/api/v1/runs/{run_id}/results",
            get(handlers::handle_get_run_results),
        )
        .route(
            "/api/v1/runs/{run_id}/cancel",
            post(handlers::handle_cancel_run),
        )
        .route("/api/v1/compare", post(handlers::handle_compare))
        .route("/api/v1/dashboard", get(handlers::handle_dashboard))
        .with_state(state)
}

/// Serves the gateway on an already-bound listener until shutdown.
pub async fn run_gateway_server(
    listener: TcpListener,
    state: Arc<GatewayState>,
) -> anyhow::Result<()> {
    let address = listener.local_addr()?;
    tracing::info!(%address, "gateway listening");
    axum::serve(listener, build_gateway_router(state)).await?;
    Ok(())
}
