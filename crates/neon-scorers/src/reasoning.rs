use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use neon_types::{AgentOutput, Case, ScoreDetail};

use crate::judge::{JudgeEvaluation, LlmJudge};
use crate::{clamp_unit, Scorer};

#[derive(Debug, Clone, Deserialize)]
/// One rubric criterion: its share of the final score and the points the
/// judge may award for it.
pub struct RubricCriterion {
    pub weight: f64,
    pub max_points: f64,
}

/// Default rubric applied when the case config does not override it.
fn default_rubric() -> BTreeMap<String, RubricCriterion> {
    let mut rubric = BTreeMap::new();
    rubric.insert(
        "logical_coherence".to_string(),
        RubricCriterion {
            weight: 0.30,
            max_points: 3.0,
        },
    );
    rubric.insert(
        "information_usage".to_string(),
        RubricCriterion {
            weight: 0.30,
            max_points: 3.0,
        },
    );
    rubric.insert(
        "problem_decomposition".to_string(),
        RubricCriterion {
            weight: 0.20,
            max_points: 2.0,
        },
    );
    rubric.insert(
        "completeness".to_string(),
        RubricCriterion {
            weight: 0.20,
            max_points: 2.0,
        },
    );
    rubric
}

/// Evaluates reasoning quality with an LLM judge against a weighted rubric,
/// degrading to a response-shape heuristic when the judge is unreachable.
pub struct ReasoningScorer {
    judge: Arc<dyn LlmJudge>,
}

impl ReasoningScorer {
    pub fn new(judge: Arc<dyn LlmJudge>) -> Self {
        Self { judge }
    }

    fn render_prompt(
        &self,
        case: &Case,
        response: &str,
        tools_called: &[String],
        rubric: &BTreeMap<String, RubricCriterion>,
    ) -> String {
        let mut criteria = String::new();
        let mut response_keys = String::new();
        for (index, (criterion, spec)) in rubric.iter().enumerate() {
            criteria.push_str(&format!(
                "{}. **{} (0-{} points)**\n",
                index + 1,
                humanize_criterion(criterion),
                spec.max_points
            ));
            response_keys.push_str(&format!("    \"{criterion}\": <0-{}>,\n", spec.max_points));
        }
        format!(
            "You are evaluating the reasoning quality of an AI agent's response.\n\n\
             ## Task\nThe agent was given this query: {query}\n\n\
             ## Agent's Response\n{response}\n\n\
             ## Tools Called\n{tools_called:?}\n\n\
             ## Evaluation Criteria\nRate the reasoning quality on a scale of 0-10 based on:\n\n\
             {criteria}\n\
             ## Response Format\nRespond with a JSON object:\n\
             {{\n    \"score\": <0-10>,\n{response_keys}    \
             \"strengths\": [\"list of reasoning strengths\"],\n    \
             \"weaknesses\": [\"list of reasoning weaknesses\"],\n    \
             \"reason\": \"One sentence summary of the evaluation\"\n}}\n",
            query = case.input.query,
        )
    }
}

#[async_trait]
impl Scorer for ReasoningScorer {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    async fn score(
        &self,
        case: &Case,
        output: &AgentOutput,
        config: Option<&Value>,
    ) -> anyhow::Result<ScoreDetail> {
        let response = &output.output;
        let tools_called = &output.tools_called;
        let rubric = rubric_from_config(config);

        let prompt = self.render_prompt(case, response, tools_called, &rubric);
        let (score, reason, evidence) = match self.judge.evaluate(&prompt).await {
            Ok(evaluation) => {
                let score = weighted_rubric_score(&evaluation, &rubric);
                let mut evidence = Vec::new();
                for strength in evaluation.string_list("strengths").iter().take(3) {
                    evidence.push(format!("Strength: {strength}"));
                }
                for weakness in evaluation.string_list("weaknesses").iter().take(3) {
                    evidence.push(format!("Weakness: {weakness}"));
                }
                for (criterion, spec) in &rubric {
                    let awarded = evaluation
                        .sub_score(criterion)
                        .map_or_else(|| "N/A".to_string(), |value| format!("{value}"));
                    evidence.push(format!(
                        "{}: {awarded}/{}",
                        humanize_criterion(criterion),
                        spec.max_points
                    ));
                }
                (score, evaluation.reason, evidence)
            }
            Err(error) => {
                tracing::warn!(case = %case.name, %error, "reasoning judge unavailable");
                (
                    heuristic_score(response, tools_called),
                    format!("LLM evaluation failed, using heuristics: {error}"),
                    vec!["Fallback to heuristic scoring".to_string()],
                )
            }
        };

        Ok(ScoreDetail {
            score: clamp_unit(score),
            reason,
            evidence,
        })
    }
}

fn rubric_from_config(config: Option<&Value>) -> BTreeMap<String, RubricCriterion> {
    config
        .and_then(|value| value.get("rubric"))
        .and_then(|rubric| {
            serde_json::from_value::<BTreeMap<String, RubricCriterion>>(rubric.clone()).ok()
        })
        .filter(|rubric| !rubric.is_empty())
        .unwrap_or_else(default_rubric)
}

/// Weighted mean of the judge's sub-scores, each normalized by its criterion
/// maximum. Falls back to the overall 0-10 score when no sub-score came back.
fn weighted_rubric_score(
    evaluation: &JudgeEvaluation,
    rubric: &BTreeMap<String, RubricCriterion>,
) -> f64 {
    let mut total_weight = 0.0;
    let mut weighted_sum = 0.0;
    for (criterion, spec) in rubric {
        if spec.max_points <= 0.0 {
            continue;
        }
        if let Some(awarded) = evaluation.sub_score(criterion) {
            weighted_sum += (awarded / spec.max_points) * spec.weight;
            total_weight += spec.weight;
        }
    }
    if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        evaluation.normalized()
    }
}

/// Deterministic fallback used when the judge is unreachable: a 0.5 baseline
/// nudged by response length and tool use.
fn heuristic_score(response: &str, tools_called: &[String]) -> f64 {
    let mut score: f64 = 0.5;
    if response.len() < 50 {
        score -= 0.2;
    } else if response.len() > 200 {
        score += 0.1;
    }
    if !tools_called.is_empty() {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

fn humanize_criterion(criterion: &str) -> String {
    let spaced = criterion.replace('_', " ");
    let mut characters = spaced.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().collect::<String>() + characters.as_str(),
        None => spaced,
    }
}
