//! Scorer pipeline: converts an agent response plus case expectations into a
//! bounded quality score with auditable evidence.
//!
//! Scorers are stateless and registered by name at orchestrator start; the
//! engine looks them up from each case's `scorers` list. Deterministic
//! scorers never touch the network; judge-backed scorers degrade to their
//! deterministic component when the judge is unreachable.

mod grounding;
mod judge;
mod reasoning;
mod tool_selection;

pub use grounding::GroundingScorer;
pub use judge::{
    extract_json_object, HttpLlmJudge, JudgeEvaluation, LlmJudge, LlmJudgeConfig,
};
pub use reasoning::{ReasoningScorer, RubricCriterion};
pub use tool_selection::ToolSelectionScorer;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use neon_types::{AgentOutput, Case, ScoreDetail};

#[async_trait]
/// One scoring strategy: `(case, agent_output, config) -> ScoreDetail` with
/// the score clamped into `[0, 1]` before returning.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        case: &Case,
        output: &AgentOutput,
        config: Option<&Value>,
    ) -> anyhow::Result<ScoreDetail>;
}

/// Clamps a raw scorer value into the unit interval.
pub(crate) fn clamp_unit(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

/// Scorers keyed by name. Built once at orchestrator start and shared across
/// every case of a run.
#[derive(Default)]
pub struct ScorerRegistry {
    scorers: BTreeMap<String, Arc<dyn Scorer>>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard pipeline: tool_selection, reasoning, grounding.
    pub fn standard(judge: Arc<dyn LlmJudge>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ToolSelectionScorer));
        registry.register(Arc::new(ReasoningScorer::new(judge.clone())));
        registry.register(Arc::new(GroundingScorer::new(judge)));
        registry
    }

    pub fn register(&mut self, scorer: Arc<dyn Scorer>) -> &mut Self {
        self.scorers.insert(scorer.name().to_string(), scorer);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scorer>> {
        self.scorers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.scorers.keys().cloned().collect()
    }
}
