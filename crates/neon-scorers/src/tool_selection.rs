use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use neon_types::{AgentOutput, Case, ScoreDetail};

use crate::{clamp_unit, Scorer};

/// Evaluates tool selection quality: were the expected tools called, were
/// unnecessary tools avoided, and was the declared sequence followed.
pub struct ToolSelectionScorer;

#[async_trait]
impl Scorer for ToolSelectionScorer {
    fn name(&self) -> &'static str {
        "tool_selection"
    }

    async fn score(
        &self,
        case: &Case,
        output: &AgentOutput,
        _config: Option<&Value>,
    ) -> anyhow::Result<ScoreDetail> {
        let tools_called = &output.tools_called;
        let mut evidence = vec![format!("Tools called: {tools_called:?}")];

        let set_score = match &case.expected_tools {
            Some(expected) if expected.is_empty() => {
                if tools_called.is_empty() {
                    evidence.push("Correctly called no tools".to_string());
                    1.0
                } else {
                    evidence.push(format!("Expected no tools, but called: {tools_called:?}"));
                    0.0
                }
            }
            Some(expected) => {
                let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
                let actual_set: BTreeSet<&str> = tools_called.iter().map(String::as_str).collect();
                let intersection = expected_set.intersection(&actual_set).count();
                let union = expected_set.union(&actual_set).count();
                let score = if union == 0 {
                    1.0
                } else {
                    intersection as f64 / union as f64
                };

                let missing: Vec<&str> = expected_set.difference(&actual_set).copied().collect();
                let extra: Vec<&str> = actual_set.difference(&expected_set).copied().collect();
                if !missing.is_empty() {
                    evidence.push(format!("Missing expected tools: {missing:?}"));
                }
                if !extra.is_empty() {
                    evidence.push(format!("Unexpected tools called: {extra:?}"));
                }
                if missing.is_empty() && extra.is_empty() {
                    evidence.push("All expected tools called correctly".to_string());
                }
                score
            }
            None => {
                evidence.push("No expected tools specified".to_string());
                0.8
            }
        };

        let final_score = match &case.expected_tool_sequence {
            Some(expected_sequence) => {
                let sequence_score = if expected_sequence == tools_called {
                    evidence.push("Tool sequence matches exactly".to_string());
                    1.0
                } else {
                    let lcs = lcs_length(expected_sequence, tools_called);
                    let max_length = expected_sequence.len().max(tools_called.len());
                    let score = if max_length == 0 {
                        1.0
                    } else {
                        lcs as f64 / max_length as f64
                    };
                    evidence.push(format!(
                        "Tool sequence differs (LCS similarity: {score:.2})"
                    ));
                    score
                };
                (set_score + sequence_score) / 2.0
            }
            None => set_score,
        };

        let reason = if final_score >= 0.9 {
            "Excellent tool selection"
        } else if final_score >= 0.7 {
            "Good tool selection with minor issues"
        } else if final_score >= 0.5 {
            "Partial tool selection - some tools missing or extra"
        } else {
            "Poor tool selection - significant mismatch"
        };

        Ok(ScoreDetail {
            score: clamp_unit(final_score),
            reason: reason.to_string(),
            evidence,
        })
    }
}

/// Longest-common-subsequence length between two tool sequences.
fn lcs_length(left: &[String], right: &[String]) -> usize {
    let (m, n) = (left.len(), right.len());
    let mut table = vec![vec![0_usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            table[i][j] = if left[i - 1] == right[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }
    table[m][n]
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use neon_types::{AgentOutput, Case, CaseInput};

    use super::{lcs_length, ToolSelectionScorer};
    use crate::Scorer;

    fn case_with_tools(
        expected_tools: Option<Vec<&str>>,
        expected_sequence: Option<Vec<&str>>,
    ) -> Case {
        Case {
            id: "case-1".to_string(),
            suite_id: "suite-1".to_string(),
            name: "tools".to_string(),
            description: None,
            input: CaseInput::default(),
            expected_tools: expected_tools
                .map(|tools| tools.into_iter().map(str::to_string).collect()),
            expected_tool_sequence: expected_sequence
                .map(|tools| tools.into_iter().map(str::to_string).collect()),
            expected_output_contains: None,
            expected_output_pattern: None,
            scorers: vec!["tool_selection".to_string()],
            scorer_config: None,
            min_score: 0.7,
            timeout_seconds: 300,
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn output_with_tools(tools: Vec<&str>) -> AgentOutput {
        AgentOutput {
            output: "done".to_string(),
            tools_called: tools.into_iter().map(str::to_string).collect(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn unit_exact_tool_match_scores_one() {
        let detail = ToolSelectionScorer
            .score(
                &case_with_tools(Some(vec!["web_search"]), None),
                &output_with_tools(vec!["web_search"]),
                None,
            )
            .await
            .expect("score");
        assert_eq!(detail.score, 1.0);
        assert_eq!(detail.reason, "Excellent tool selection");
        assert!(detail
            .evidence
            .iter()
            .any(|line| line == "All expected tools called correctly"));
    }

    #[tokio::test]
    async fn unit_jaccard_penalizes_missing_and_extra_tools() {
        let detail = ToolSelectionScorer
            .score(
                &case_with_tools(Some(vec!["web_search", "calculator"]), None),
                &output_with_tools(vec!["web_search", "code_exec"]),
                None,
            )
            .await
            .expect("score");
        // Intersection 1, union 3.
        assert!((detail.score - 1.0 / 3.0).abs() < 1e-9);
        assert!(detail.evidence.iter().any(|line| line.contains("Missing")));
        assert!(detail
            .evidence
            .iter()
            .any(|line| line.contains("Unexpected")));
    }

    #[tokio::test]
    async fn unit_set_component_is_order_invariant() {
        let case = case_with_tools(Some(vec!["a", "b", "c"]), None);
        let forward = ToolSelectionScorer
            .score(&case, &output_with_tools(vec!["a", "b", "c"]), None)
            .await
            .expect("score");
        let shuffled = ToolSelectionScorer
            .score(&case, &output_with_tools(vec!["c", "a", "b"]), None)
            .await
            .expect("score");
        assert_eq!(forward.score, shuffled.score);
    }

    #[tokio::test]
    async fn unit_empty_expected_tools_requires_zero_tools() {
        let case = case_with_tools(Some(vec![]), None);
        let clean = ToolSelectionScorer
            .score(&case, &output_with_tools(vec![]), None)
            .await
            .expect("score");
        assert_eq!(clean.score, 1.0);

        let dirty = ToolSelectionScorer
            .score(&case, &output_with_tools(vec!["web_search"]), None)
            .await
            .expect("score");
        assert_eq!(dirty.score, 0.0);
    }

    #[tokio::test]
    async fn unit_unspecified_expected_tools_scores_neutral() {
        let detail = ToolSelectionScorer
            .score(
                &case_with_tools(None, None),
                &output_with_tools(vec!["anything"]),
                None,
            )
            .await
            .expect("score");
        assert_eq!(detail.score, 0.8);
    }

    #[tokio::test]
    async fn unit_sequence_component_averages_with_set_component() {
        let detail = ToolSelectionScorer
            .score(
                &case_with_tools(Some(vec!["a", "b"]), Some(vec!["a", "b"])),
                &output_with_tools(vec!["b", "a"]),
                None,
            )
            .await
            .expect("score");
        // Set score 1.0; LCS of [a,b] vs [b,a] is 1, max len 2 -> 0.5.
        assert!((detail.score - 0.75).abs() < 1e-9);
        assert!(detail
            .evidence
            .iter()
            .any(|line| line.contains("LCS similarity: 0.50")));
    }

    #[test]
    fn unit_lcs_is_bounded_and_exact_on_equality() {
        let a: Vec<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["x", "q", "z"].iter().map(|s| s.to_string()).collect();
        assert_eq!(lcs_length(&a, &a), 3);
        assert_eq!(lcs_length(&a, &b), 2);
        assert_eq!(lcs_length(&a, &[]), 0);
    }
}
