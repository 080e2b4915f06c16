use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;

use neon_types::{AgentOutput, Case, ScoreDetail};

use crate::judge::LlmJudge;
use crate::{clamp_unit, Scorer};

/// Weight of the deterministic content check in the combined score.
const DETERMINISTIC_WEIGHT: f64 = 0.3;
/// Weight of the LLM judge verdict in the combined score.
const JUDGE_WEIGHT: f64 = 0.7;
/// Neutral score used when the case declares no content expectations.
const NEUTRAL_CONTENT_SCORE: f64 = 0.8;

/// Evaluates whether the response is grounded in evidence: expected content
/// present, claims supported by context, no hallucinated facts.
pub struct GroundingScorer {
    judge: Arc<dyn LlmJudge>,
}

impl GroundingScorer {
    pub fn new(judge: Arc<dyn LlmJudge>) -> Self {
        Self { judge }
    }

    fn render_prompt(&self, case: &Case, response: &str) -> String {
        let context = if case.input.context.is_empty() {
            "No context provided".to_string()
        } else {
            Value::Object(case.input.context.clone()).to_string()
        };
        let expected_content = match &case.expected_output_contains {
            Some(expected) if !expected.is_empty() => format!("{expected:?}"),
            _ => "None specified".to_string(),
        };
        format!(
            "You are evaluating whether an AI agent's response is properly grounded in evidence.\n\n\
             ## Task\nThe agent was given this query: {query}\n\n\
             ## Agent's Response\n{response}\n\n\
             ## Available Context/Evidence\n{context}\n\n\
             ## Expected Content\nThe response should contain: {expected_content}\n\n\
             ## Evaluation Criteria\nRate the grounding quality on a scale of 0-10:\n\n\
             1. **Factual Accuracy (0-4 points)**\n   - Are all factual claims accurate?\n   - Are there any hallucinated facts?\n\n\
             2. **Evidence Support (0-4 points)**\n   - Are claims supported by the available context?\n   - Does the agent cite or reference its sources appropriately?\n\n\
             3. **Expected Content Match (0-2 points)**\n   - Does the response include the expected key information?\n\n\
             ## Response Format\nRespond with a JSON object:\n\
             {{\n    \"score\": <0-10>,\n    \"factual_accuracy\": <0-4>,\n    \"evidence_support\": <0-4>,\n    \"content_match\": <0-2>,\n    \"grounded_claims\": [\"list of properly grounded claims\"],\n    \"ungrounded_claims\": [\"list of potentially hallucinated or unsupported claims\"],\n    \"reason\": \"One sentence summary\"\n}}\n",
            query = case.input.query,
        )
    }
}

#[async_trait]
impl Scorer for GroundingScorer {
    fn name(&self) -> &'static str {
        "grounding"
    }

    async fn score(
        &self,
        case: &Case,
        output: &AgentOutput,
        _config: Option<&Value>,
    ) -> anyhow::Result<ScoreDetail> {
        let response = &output.output;
        let mut evidence = Vec::new();
        let content_score = check_expected_content(
            response,
            case.expected_output_contains.as_deref().unwrap_or(&[]),
            case.expected_output_pattern.as_deref(),
            &mut evidence,
        );

        let prompt = self.render_prompt(case, response);
        let (final_score, reason) = match self.judge.evaluate(&prompt).await {
            Ok(evaluation) => {
                for claim in evaluation.string_list("grounded_claims").iter().take(3) {
                    evidence.push(format!("Grounded: {claim}"));
                }
                for claim in evaluation.string_list("ungrounded_claims").iter().take(3) {
                    evidence.push(format!("Ungrounded: {claim}"));
                }
                evidence.push(format!(
                    "Factual accuracy: {}/4",
                    format_sub_score(evaluation.sub_score("factual_accuracy"))
                ));
                evidence.push(format!(
                    "Evidence support: {}/4",
                    format_sub_score(evaluation.sub_score("evidence_support"))
                ));
                let combined = content_score * DETERMINISTIC_WEIGHT
                    + evaluation.normalized() * JUDGE_WEIGHT;
                (combined, evaluation.reason)
            }
            Err(error) => {
                tracing::warn!(case = %case.name, %error, "grounding judge unavailable");
                evidence.push("Fallback to content matching only".to_string());
                (
                    content_score,
                    format!("LLM evaluation failed, using content matching: {error}"),
                )
            }
        };

        Ok(ScoreDetail {
            score: clamp_unit(final_score),
            reason,
            evidence,
        })
    }
}

fn format_sub_score(score: Option<f64>) -> String {
    score.map_or_else(|| "N/A".to_string(), |value| format!("{value}"))
}

/// Deterministic component: fraction of expected substrings and pattern that
/// actually occur in the response. An invalid pattern counts as a missed
/// expectation and is logged in the evidence.
fn check_expected_content(
    response: &str,
    expected_contains: &[String],
    expected_pattern: Option<&str>,
    evidence: &mut Vec<String>,
) -> f64 {
    if expected_contains.is_empty() && expected_pattern.is_none() {
        return NEUTRAL_CONTENT_SCORE;
    }

    let mut matches = 0_usize;
    let mut total = 0_usize;

    let response_lower = response.to_lowercase();
    for expected in expected_contains {
        total += 1;
        if response_lower.contains(&expected.to_lowercase()) {
            matches += 1;
            evidence.push(format!("Found expected: '{expected}'"));
        } else {
            evidence.push(format!("Missing expected: '{expected}'"));
        }
    }

    if let Some(pattern) = expected_pattern {
        total += 1;
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => {
                if regex.is_match(response) {
                    matches += 1;
                    evidence.push(format!("Pattern matched: {pattern}"));
                } else {
                    evidence.push(format!("Pattern not matched: {pattern}"));
                }
            }
            Err(_) => evidence.push(format!("Invalid pattern: {pattern}")),
        }
    }

    if total == 0 {
        NEUTRAL_CONTENT_SCORE
    } else {
        matches as f64 / total as f64
    }
}
