//! Regression detection between two completed runs.
//!
//! Results are joined by case name, the stable key across runs: case ids
//! change when a suite is rewritten, names do not. Each joined
//! (case, scorer) pair is classified against the threshold; scorers present
//! on only one side are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use neon_store::SqliteEvalStore;
use neon_types::{
    round_to_places, CompareReport, EvalError, Run, RunReference, ScoreDelta,
};

/// Joins baseline and candidate runs and produces the regression report.
pub struct RunComparator {
    store: Arc<SqliteEvalStore>,
}

impl RunComparator {
    pub fn new(store: Arc<SqliteEvalStore>) -> Self {
        Self { store }
    }

    pub async fn compare(
        &self,
        project_id: &str,
        baseline_id: &str,
        candidate_id: &str,
        threshold: f64,
    ) -> Result<CompareReport, EvalError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EvalError::invalid(format!(
                "threshold {threshold} is outside [0, 1]"
            )));
        }
        let baseline = self.store.get_run(project_id, baseline_id).await?;
        let candidate = self.store.get_run(project_id, candidate_id).await?;

        let baseline_results = self
            .store
            .list_results(project_id, baseline_id, false)
            .await?;
        let candidate_results = self
            .store
            .list_results(project_id, candidate_id, false)
            .await?;

        // Baseline scores indexed by case name, then scorer.
        let mut baseline_scores: BTreeMap<&str, &BTreeMap<String, f64>> = BTreeMap::new();
        for result in &baseline_results {
            baseline_scores.insert(result.case_name.as_str(), &result.scores);
        }

        let mut regressions = Vec::new();
        let mut improvements = Vec::new();
        let mut unchanged = 0_u64;

        for result in &candidate_results {
            let Some(case_baseline) = baseline_scores.get(result.case_name.as_str()) else {
                continue;
            };
            for (scorer, candidate_score) in &result.scores {
                let Some(baseline_score) = case_baseline.get(scorer) else {
                    continue;
                };
                let delta = candidate_score - baseline_score;
                let item = ScoreDelta {
                    case_name: result.case_name.clone(),
                    scorer: scorer.clone(),
                    baseline_score: *baseline_score,
                    candidate_score: *candidate_score,
                    delta,
                };
                if delta < -threshold {
                    regressions.push(item);
                } else if delta > threshold {
                    improvements.push(item);
                } else {
                    unchanged += 1;
                }
            }
        }

        regressions.sort_by(|a, b| a.delta.total_cmp(&b.delta));
        improvements.sort_by(|a, b| b.delta.total_cmp(&a.delta));

        let overall_delta =
            round_to_places(summary_avg(&candidate) - summary_avg(&baseline), 4);
        let passed = regressions.is_empty();
        tracing::debug!(
            baseline = baseline_id,
            candidate = candidate_id,
            regressions = regressions.len(),
            improvements = improvements.len(),
            unchanged,
            passed,
            "runs compared"
        );

        Ok(CompareReport {
            baseline: RunReference {
                id: baseline.id,
                agent_version: baseline.agent_version,
            },
            candidate: RunReference {
                id: candidate.id,
                agent_version: candidate.agent_version,
            },
            passed,
            overall_delta,
            regressions,
            improvements,
            unchanged,
            threshold,
        })
    }
}

fn summary_avg(run: &Run) -> f64 {
    run.summary
        .as_ref()
        .map(|summary| summary.avg_score)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;

    use neon_store::SqliteEvalStore;
    use neon_types::{
        CaseDraft, CaseInput, CaseResult, EvalError, ResultStatus, RunDraft, RunStatus,
        RunSummary, RunTrigger, ScoreDetails, SuiteConfig, SuiteDraft,
    };

    use super::RunComparator;

    async fn seeded_store() -> (Arc<SqliteEvalStore>, String, String) {
        let store = Arc::new(SqliteEvalStore::open_in_memory().expect("open"));
        let project = store
            .create_project("Demo", "demo", None)
            .await
            .expect("project");
        let suite = store
            .create_suite(
                &project.id,
                &SuiteDraft {
                    name: "capitals".to_string(),
                    description: None,
                    agent_id: "demo:agent".to_string(),
                    config: SuiteConfig::default(),
                    cases: vec![CaseDraft {
                        name: "france".to_string(),
                        description: None,
                        input: CaseInput::default(),
                        expected_tools: None,
                        expected_tool_sequence: None,
                        expected_output_contains: None,
                        expected_output_pattern: None,
                        scorers: Vec::new(),
                        scorer_config: None,
                        min_score: None,
                        timeout_seconds: None,
                        tags: Vec::new(),
                    }],
                },
            )
            .await
            .expect("suite");
        (store, project.id, suite.id)
    }

    async fn completed_run_with_scores(
        store: &SqliteEvalStore,
        project_id: &str,
        suite_id: &str,
        case_name: &str,
        scores: &[(&str, f64)],
        avg_score: f64,
    ) -> String {
        let run = store
            .create_run(project_id, suite_id, RunTrigger::Ci, &RunDraft::default())
            .await
            .expect("run");
        store
            .transition_run(&run.id, &[RunStatus::Pending], RunStatus::Running, None)
            .await
            .expect("start");
        let mut score_map = BTreeMap::new();
        for (scorer, score) in scores {
            score_map.insert(scorer.to_string(), *score);
        }
        store
            .insert_result(&CaseResult {
                id: neon_core::new_entity_id(),
                run_id: run.id.clone(),
                case_id: neon_core::new_entity_id(),
                case_name: case_name.to_string(),
                trace_run_id: None,
                trace_id: None,
                status: ResultStatus::Success,
                output: None,
                scores: score_map,
                score_details: ScoreDetails::default(),
                passed: true,
                execution_time_ms: 5,
                error: None,
                created_at: Utc::now(),
            })
            .await
            .expect("result");
        let summary = RunSummary {
            total_cases: 1,
            passed: 1,
            avg_score,
            ..RunSummary::default()
        };
        store
            .transition_run(
                &run.id,
                &[RunStatus::Running],
                RunStatus::Completed,
                Some(&summary),
            )
            .await
            .expect("complete");
        run.id
    }

    #[tokio::test]
    async fn functional_tool_regression_is_detected_and_sorted_worst_first() {
        let (store, project_id, suite_id) = seeded_store().await;
        let baseline = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 1.0), ("grounding", 0.9)],
            0.95,
        )
        .await;
        let candidate = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.0), ("grounding", 0.8)],
            0.4,
        )
        .await;

        let report = RunComparator::new(store)
            .compare(&project_id, &baseline, &candidate, 0.05)
            .await
            .expect("compare");
        assert!(!report.passed);
        assert_eq!(report.regressions.len(), 2);
        assert_eq!(report.regressions[0].scorer, "tool_selection");
        assert!((report.regressions[0].delta + 1.0).abs() < 1e-9);
        assert_eq!(report.unchanged, 0);
        assert!((report.overall_delta + 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn functional_join_is_by_case_name_even_when_case_ids_differ() {
        let (store, project_id, suite_id) = seeded_store().await;
        // Each helper invents a fresh case_id; only the name matches.
        let baseline = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.5)],
            0.5,
        )
        .await;
        let candidate = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.9)],
            0.9,
        )
        .await;

        let report = RunComparator::new(store)
            .compare(&project_id, &baseline, &candidate, 0.05)
            .await
            .expect("compare");
        assert!(report.passed);
        assert_eq!(report.improvements.len(), 1);
        assert!((report.improvements[0].delta - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn functional_comparison_is_idempotent() {
        let (store, project_id, suite_id) = seeded_store().await;
        let baseline = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.9)],
            0.9,
        )
        .await;
        let candidate = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.7)],
            0.7,
        )
        .await;

        let comparator = RunComparator::new(store);
        let first = comparator
            .compare(&project_id, &baseline, &candidate, 0.05)
            .await
            .expect("compare");
        let second = comparator
            .compare(&project_id, &baseline, &candidate, 0.05)
            .await
            .expect("compare");
        assert_eq!(first.passed, second.passed);
        assert_eq!(first.regressions, second.regressions);
        assert_eq!(first.improvements, second.improvements);
        assert_eq!(first.unchanged, second.unchanged);
        assert_eq!(first.overall_delta, second.overall_delta);
    }

    #[tokio::test]
    async fn functional_raising_threshold_weakly_shrinks_regressions() {
        let (store, project_id, suite_id) = seeded_store().await;
        let baseline = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.9), ("grounding", 0.8)],
            0.85,
        )
        .await;
        let candidate = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.7), ("grounding", 0.78)],
            0.74,
        )
        .await;

        let comparator = RunComparator::new(store);
        let mut previous_regressions = usize::MAX;
        let mut previous_unchanged = 0_u64;
        for threshold in [0.01, 0.05, 0.25] {
            let report = comparator
                .compare(&project_id, &baseline, &candidate, threshold)
                .await
                .expect("compare");
            assert!(report.regressions.len() <= previous_regressions);
            assert!(report.unchanged >= previous_unchanged);
            previous_regressions = report.regressions.len();
            previous_unchanged = report.unchanged;
        }
    }

    #[tokio::test]
    async fn functional_scorers_on_only_one_side_are_ignored() {
        let (store, project_id, suite_id) = seeded_store().await;
        let baseline = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.9)],
            0.9,
        )
        .await;
        let candidate = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("grounding", 0.2)],
            0.2,
        )
        .await;

        let report = RunComparator::new(store)
            .compare(&project_id, &baseline, &candidate, 0.05)
            .await
            .expect("compare");
        assert!(report.passed);
        assert!(report.regressions.is_empty());
        assert!(report.improvements.is_empty());
        assert_eq!(report.unchanged, 0);
    }

    #[tokio::test]
    async fn functional_missing_run_or_bad_threshold_is_rejected() {
        let (store, project_id, suite_id) = seeded_store().await;
        let baseline = completed_run_with_scores(
            &store,
            &project_id,
            &suite_id,
            "france",
            &[("tool_selection", 0.9)],
            0.9,
        )
        .await;
        let comparator = RunComparator::new(store);
        let missing = comparator
            .compare(&project_id, &baseline, "absent-run", 0.05)
            .await;
        assert!(matches!(missing, Err(EvalError::NotFound(_))));

        let invalid = comparator
            .compare(&project_id, &baseline, &baseline, 1.5)
            .await;
        assert!(matches!(invalid, Err(EvalError::Invalid(_))));
    }
}
