use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use neon_agent::Agent;
use neon_core::new_entity_id;
use neon_scorers::ScorerRegistry;
use neon_store::SqliteEvalStore;
use neon_trace::TraceClient;
use neon_types::{
    Case, CaseResult, EvalError, ResultStatus, Run, ScoreDetail, ScoreDetails, Suite,
};

/// Executes one case: traced agent invocation, scoring, pass/fail decision,
/// and the result write.
///
/// Per-case failures are always recovered into a result row; the only error
/// this runner surfaces is a store write failure, which is fatal to the
/// enclosing run.
pub struct CaseRunner {
    store: Arc<SqliteEvalStore>,
    scorers: Arc<ScorerRegistry>,
}

impl CaseRunner {
    pub fn new(store: Arc<SqliteEvalStore>, scorers: Arc<ScorerRegistry>) -> Self {
        Self { store, scorers }
    }

    pub async fn run_case(
        &self,
        trace_client: &TraceClient,
        run: &Run,
        suite: &Suite,
        case: &Case,
        agent: &Arc<dyn Agent>,
    ) -> Result<CaseResult, EvalError> {
        let run_name = format!("{}/{}", run.id, case.name);
        let mut tags = BTreeMap::new();
        tags.insert("run_id".to_string(), run.id.clone());
        tags.insert("case_name".to_string(), case.name.clone());
        tags.insert("suite_id".to_string(), suite.id.clone());
        tags.insert("suite_name".to_string(), suite.name.clone());
        tags.insert("project_id".to_string(), run.project_id.clone());
        if let Some(agent_version) = &run.agent_version {
            tags.insert("agent_version".to_string(), agent_version.clone());
        }

        let execution = trace_client
            .execute_traced(agent, &case.input, &run_name, &tags, case.timeout_seconds)
            .await;

        let mut scores = BTreeMap::new();
        let mut score_details = ScoreDetails {
            trace_summary: execution.trace_summary.clone(),
            scorers: BTreeMap::new(),
        };

        if execution.status == ResultStatus::Success {
            if let Some(output) = &execution.output {
                for scorer_name in &case.scorers {
                    let Some(scorer) = self.scorers.get(scorer_name) else {
                        tracing::warn!(
                            case = %case.name,
                            scorer = %scorer_name,
                            "unknown scorer named by case; skipping"
                        );
                        continue;
                    };
                    match scorer
                        .score(case, output, case.scorer_config.as_ref())
                        .await
                    {
                        Ok(detail) => {
                            scores.insert(scorer_name.clone(), detail.score);
                            score_details.scorers.insert(scorer_name.clone(), detail);
                        }
                        Err(error) => {
                            // The score is omitted; the failure stays auditable.
                            score_details.scorers.insert(
                                scorer_name.clone(),
                                ScoreDetail {
                                    score: 0.0,
                                    reason: format!("scorer '{scorer_name}' failed"),
                                    evidence: vec![error.to_string()],
                                },
                            );
                        }
                    }
                }
            }
        }

        let avg_score = if scores.is_empty() {
            0.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };
        let passed = execution.status == ResultStatus::Success && avg_score >= case.min_score;

        let result = CaseResult {
            id: new_entity_id(),
            run_id: run.id.clone(),
            case_id: case.id.clone(),
            case_name: case.name.clone(),
            trace_run_id: execution.trace_run_id,
            trace_id: execution.trace_id,
            status: execution.status,
            output: execution.output,
            scores,
            score_details,
            passed,
            execution_time_ms: execution.execution_time_ms,
            error: execution.error,
            created_at: Utc::now(),
        };
        self.store.insert_result(&result).await?;
        tracing::debug!(
            run_id = %run.id,
            case = %case.name,
            status = result.status.as_str(),
            passed = result.passed,
            "case finished"
        );
        Ok(result)
    }
}
