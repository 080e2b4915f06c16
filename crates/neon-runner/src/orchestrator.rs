use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;

use neon_agent::{load_agent, Agent, AgentRegistry};
use neon_store::SqliteEvalStore;
use neon_trace::{TraceBackend, TraceClient};
use neon_types::{
    round_to_places, Case, CaseResult, EvalError, Run, RunDraft, RunStatus, RunSummary,
    RunTrigger, Suite,
};

use crate::case_runner::CaseRunner;

/// Default bound on concurrently executing cases per orchestrator.
pub const DEFAULT_MAX_PARALLEL_CASES: usize = 10;

#[derive(Debug, Clone)]
/// Orchestrator tunables.
pub struct OrchestratorConfig {
    /// In-flight case executions never exceed this; excess cases queue.
    pub max_parallel_cases: usize,
    /// Local CLI runs trace under `neon-local-{suite}` instead of the
    /// project experiment.
    pub local_experiment: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_cases: DEFAULT_MAX_PARALLEL_CASES,
            local_experiment: false,
        }
    }
}

/// Owns the run lifecycle: create, execute the case schedule, aggregate the
/// summary, and publish the terminal state.
pub struct RunOrchestrator {
    store: Arc<SqliteEvalStore>,
    agents: Arc<AgentRegistry>,
    trace_backend: Arc<dyn TraceBackend>,
    runner: CaseRunner,
    config: OrchestratorConfig,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<SqliteEvalStore>,
        agents: Arc<AgentRegistry>,
        trace_backend: Arc<dyn TraceBackend>,
        scorers: Arc<neon_scorers::ScorerRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let runner = CaseRunner::new(store.clone(), scorers);
        Self {
            store,
            agents,
            trace_backend,
            runner,
            config,
        }
    }

    /// Validates the suite and persists a pending run, returned immediately.
    pub async fn create_run(
        &self,
        project_id: &str,
        suite_id: &str,
        trigger: RunTrigger,
        draft: &RunDraft,
    ) -> Result<Run, EvalError> {
        self.store
            .create_run(project_id, suite_id, trigger, draft)
            .await
    }

    /// Permitted only while the run is pending or running.
    pub async fn cancel_run(&self, project_id: &str, run_id: &str) -> Result<bool, EvalError> {
        self.store.cancel_run(project_id, run_id).await
    }

    /// Drives a pending run to a terminal state.
    ///
    /// Agent-load failures and store failures transition the run to `failed`
    /// with `summary.error` set; individual case failures never do. A
    /// concurrent cancel wins any race against the final summary write.
    pub async fn start_execution(
        &self,
        project_id: &str,
        run_id: &str,
        working_dir: Option<&Path>,
    ) -> Result<Run, EvalError> {
        let run = self.store.get_run(project_id, run_id).await?;
        let suite = self.store.get_suite(project_id, &run.suite_id).await?;
        let cases = self.store.list_cases(project_id, &suite.id).await?;

        let agent = match load_agent(&self.agents, &suite.agent_id, working_dir) {
            Ok(agent) => agent,
            Err(error) => {
                tracing::error!(run_id, agent_id = %suite.agent_id, %error, "agent load failed");
                self.fail_run(run_id, format!("Failed to load agent: {error}"))
                    .await?;
                return self.store.get_run(project_id, run_id).await;
            }
        };

        let started = self
            .store
            .transition_run(run_id, &[RunStatus::Pending], RunStatus::Running, None)
            .await?;
        if !started {
            // A concurrent cancel arrived before execution began.
            tracing::info!(run_id, "run not started; already left pending state");
            return self.store.get_run(project_id, run_id).await;
        }
        tracing::info!(run_id, suite = %suite.name, cases = cases.len(), "run started");

        let trace_client = if self.config.local_experiment {
            TraceClient::for_local_suite(self.trace_backend.clone(), &suite.name)
        } else {
            TraceClient::for_project(self.trace_backend.clone(), project_id)
        };

        let schedule_outcome = if suite.config.parallel {
            self.execute_parallel(&trace_client, &run, &suite, &cases, &agent)
                .await
        } else {
            self.execute_sequential(&trace_client, &run, &suite, &cases, &agent)
                .await
        };

        if let Err(error) = schedule_outcome {
            tracing::error!(run_id, %error, "run schedule failed");
            self.fail_run(run_id, error.to_string()).await?;
            return self.store.get_run(project_id, run_id).await;
        }

        let results = self.store.list_results(project_id, run_id, false).await?;
        let summary = summarize_results(&results);
        let completed = self
            .store
            .transition_run(
                run_id,
                &[RunStatus::Running],
                RunStatus::Completed,
                Some(&summary),
            )
            .await?;
        if completed {
            tracing::info!(
                run_id,
                total = summary.total_cases,
                passed = summary.passed,
                failed = summary.failed,
                errored = summary.errored,
                "run completed"
            );
        } else {
            // Cancelled mid-flight; the terminal state stands and the
            // summary is intentionally not written.
            tracing::info!(run_id, "run reached a terminal state before completion");
        }
        self.store.get_run(project_id, run_id).await
    }

    async fn execute_parallel(
        &self,
        trace_client: &TraceClient,
        run: &Run,
        suite: &Suite,
        cases: &[Case],
        agent: &Arc<dyn Agent>,
    ) -> Result<(), EvalError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_cases.max(1)));
        let executions = cases.iter().map(|case| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| EvalError::internal("case scheduler semaphore closed"))?;
                self.runner
                    .run_case(trace_client, run, suite, case, agent)
                    .await
            }
        });
        let outcomes = futures_util::future::join_all(executions).await;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    async fn execute_sequential(
        &self,
        trace_client: &TraceClient,
        run: &Run,
        suite: &Suite,
        cases: &[Case],
        agent: &Arc<dyn Agent>,
    ) -> Result<(), EvalError> {
        for case in cases {
            let current = self.store.get_run(&run.project_id, &run.id).await?;
            if current.status == RunStatus::Cancelled {
                tracing::info!(run_id = %run.id, "cancel observed; stopping schedule");
                break;
            }
            let result = self
                .runner
                .run_case(trace_client, run, suite, case, agent)
                .await?;
            if suite.config.stop_on_failure && !result.passed {
                tracing::info!(
                    run_id = %run.id,
                    case = %case.name,
                    "stop_on_failure triggered; remaining cases skipped"
                );
                break;
            }
        }
        Ok(())
    }

    async fn fail_run(&self, run_id: &str, error: String) -> Result<(), EvalError> {
        let summary = RunSummary::from_error(error);
        self.store
            .transition_run(
                run_id,
                &[RunStatus::Pending, RunStatus::Running],
                RunStatus::Failed,
                Some(&summary),
            )
            .await?;
        Ok(())
    }
}

/// Recomputes the run summary from the persisted results.
pub fn summarize_results(results: &[CaseResult]) -> RunSummary {
    let total_cases = results.len() as u64;
    let passed = results.iter().filter(|result| result.passed).count() as u64;
    let failed = results
        .iter()
        .filter(|result| !result.passed && result.status == neon_types::ResultStatus::Success)
        .count() as u64;
    let errored = results
        .iter()
        .filter(|result| result.status != neon_types::ResultStatus::Success)
        .count() as u64;

    let mut by_type: std::collections::BTreeMap<String, Vec<f64>> = Default::default();
    for result in results {
        for (scorer, score) in &result.scores {
            by_type.entry(scorer.clone()).or_default().push(*score);
        }
    }
    let scores_by_type = by_type
        .iter()
        .map(|(scorer, scores)| {
            (
                scorer.clone(),
                round_to_places(scores.iter().sum::<f64>() / scores.len() as f64, 4),
            )
        })
        .collect();

    let score_count: usize = by_type.values().map(Vec::len).sum();
    let avg_score = if score_count == 0 {
        0.0
    } else {
        round_to_places(
            by_type.values().flatten().sum::<f64>() / score_count as f64,
            4,
        )
    };

    RunSummary {
        total_cases,
        passed,
        failed,
        errored,
        avg_score,
        scores_by_type,
        execution_time_ms: results.iter().map(|result| result.execution_time_ms).sum(),
        error: None,
    }
}

/// Resolves the working directory used for command-manifest agents.
pub fn resolve_working_dir(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| std::env::current_dir().ok())
}
