//! Trace capture layer wrapping the external observability store.
//!
//! [`TraceClient`] executes an agent inside a traced scope: it opens a run on
//! the backend, enforces the per-case timeout, captures whatever trace the
//! agent's own instrumentation emitted, and reduces it to a
//! [`neon_types::TraceSummary`]. Backend failures never fail a case; they are
//! logged and the result simply carries no trace identifiers.

mod backend;
mod http_backend;
mod spans;

pub use backend::{InMemoryTraceBackend, RecordedTraceRun, TraceBackend};
pub use http_backend::{HttpTraceBackend, HttpTraceBackendConfig};
pub use spans::{extract_trace_summary, CapturedTrace, Span, SpanEvent, SpanKind};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use neon_agent::Agent;
use neon_types::{AgentOutput, CaseInput, ResultStatus, TraceSummary};

/// Marker tag stamped on every scope the engine opens.
const SOURCE_TAG_VALUE: &str = "neon-eval";

#[derive(Debug, Clone)]
/// Outcome of one traced agent invocation.
pub struct ExecutionResult {
    pub trace_run_id: Option<String>,
    pub trace_id: Option<String>,
    pub output: Option<AgentOutput>,
    pub status: ResultStatus,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub trace_summary: Option<TraceSummary>,
}

/// Client binding traced execution to one experiment.
///
/// Server-side runs use the `neon-{project_id}` experiment; local CLI runs
/// use `neon-local-{suite_name}`.
pub struct TraceClient {
    backend: Arc<dyn TraceBackend>,
    experiment: String,
}

impl TraceClient {
    pub fn for_project(backend: Arc<dyn TraceBackend>, project_id: &str) -> Self {
        Self {
            backend,
            experiment: format!("neon-{project_id}"),
        }
    }

    pub fn for_local_suite(backend: Arc<dyn TraceBackend>, suite_name: &str) -> Self {
        Self {
            backend,
            experiment: format!("neon-local-{suite_name}"),
        }
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Runs the agent inside a traced scope with a hard timeout.
    ///
    /// Never returns an error: agent failures and timeouts are classified
    /// into the result status, and trace-backend failures are recorded but do
    /// not propagate.
    pub async fn execute_traced(
        &self,
        agent: &Arc<dyn Agent>,
        input: &CaseInput,
        run_name: &str,
        tags: &BTreeMap<String, String>,
        timeout_seconds: u64,
    ) -> ExecutionResult {
        let mut scoped_tags = BTreeMap::new();
        for (key, value) in tags {
            let key = if key.starts_with("neon.") {
                key.clone()
            } else {
                format!("neon.{key}")
            };
            scoped_tags.insert(key, value.clone());
        }
        scoped_tags.insert("neon.source".to_string(), SOURCE_TAG_VALUE.to_string());
        scoped_tags.insert(
            "neon.timeout_seconds".to_string(),
            timeout_seconds.to_string(),
        );

        let trace_run_id = match self
            .backend
            .open_run(&self.experiment, run_name, &scoped_tags)
            .await
        {
            Ok(run_id) => Some(run_id),
            Err(error) => {
                tracing::warn!(run_name, %error, "trace backend open failed; continuing untraced");
                None
            }
        };

        let started = Instant::now();
        let invocation = tokio::time::timeout(
            Duration::from_secs(timeout_seconds.max(1)),
            agent.run(&input.query, &input.context),
        )
        .await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let (status, output, error) = match invocation {
            Ok(Ok(output)) => (ResultStatus::Success, Some(output), None),
            Ok(Err(agent_error)) => (ResultStatus::Error, None, Some(agent_error.to_string())),
            Err(_) => (
                ResultStatus::Timeout,
                None,
                Some(format!("execution timed out after {timeout_seconds}s")),
            ),
        };

        let mut trace_id = None;
        let mut trace_summary = None;
        if let Some(run_id) = &trace_run_id {
            match self.backend.latest_trace(run_id).await {
                Ok(Some(trace)) => {
                    let summary = extract_trace_summary(&trace);
                    trace_id = Some(summary.trace_id.clone());
                    trace_summary = Some(summary);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(run_name, %error, "trace capture failed");
                }
            }
            if let Err(error) = self
                .backend
                .close_run(run_id, status.as_str(), execution_time_ms)
                .await
            {
                tracing::warn!(run_name, %error, "trace backend close failed");
            }
        }

        ExecutionResult {
            trace_run_id,
            trace_id,
            output,
            status,
            error,
            execution_time_ms,
            trace_summary,
        }
    }
}
