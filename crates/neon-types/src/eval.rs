use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trace::TraceSummary;
use crate::JsonMap;

/// Pass threshold applied when a case does not specify one.
pub const DEFAULT_MIN_SCORE: f64 = 0.7;
/// Per-case agent timeout applied when a case does not specify one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
/// Scorers applied when neither the case nor the suite names any.
pub const DEFAULT_SCORERS: [&str; 2] = ["tool_selection", "reasoning"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Lifecycle state of an evaluation run.
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// What initiated a run.
pub enum RunTrigger {
    Cli,
    Ci,
    Manual,
    Api,
}

impl RunTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Ci => "ci",
            Self::Manual => "manual",
            Self::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cli" => Some(Self::Cli),
            "ci" => Some(Self::Ci),
            "manual" => Some(Self::Manual),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Outcome of one case execution.
pub enum ResultStatus {
    Success,
    Error,
    Timeout,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Tenant boundary. Owns suites, runs, and API keys.
pub struct Project {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_tracking_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Execution defaults carried by a suite, applied to cases that omit them.
pub struct SuiteConfig {
    pub parallel: bool,
    pub stop_on_failure: bool,
    pub default_scorers: Vec<String>,
    pub default_min_score: f64,
    pub default_timeout_seconds: u64,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            stop_on_failure: false,
            default_scorers: DEFAULT_SCORERS.iter().map(|s| s.to_string()).collect(),
            default_min_score: DEFAULT_MIN_SCORE,
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Named collection of cases targeting a specific agent.
pub struct Suite {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Agent locator in `module:attribute` form.
    pub agent_id: String,
    pub config: SuiteConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Structured input handed to the agent for one case.
pub struct CaseInput {
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub context: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One test input plus expectations and a pass threshold.
pub struct Case {
    pub id: String,
    pub suite_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input: CaseInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_tool_sequence: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output_contains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output_pattern: Option<String>,
    pub scorers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scorer_config: Option<Value>,
    pub min_score: f64,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Aggregate statistics for a completed run. A failed run's summary carries
/// the orchestration error alongside zeroed counters.
pub struct RunSummary {
    #[serde(default)]
    pub total_cases: u64,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub avg_score: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores_by_type: BTreeMap<String, f64>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    /// Summary shape written when orchestration itself fails.
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One execution of one suite at one agent version.
pub struct Run {
    pub id: String,
    pub project_id: String,
    pub suite_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    pub trigger: RunTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_ref: Option<String>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Score plus auditable evidence produced by one scorer for one case.
pub struct ScoreDetail {
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Per-scorer details for a result, plus the optional captured trace summary.
pub struct ScoreDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_summary: Option<TraceSummary>,
    #[serde(flatten)]
    pub scorers: BTreeMap<String, ScoreDetail>,
}

impl ScoreDetails {
    pub fn is_empty(&self) -> bool {
        self.trace_summary.is_none() && self.scorers.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Uniform agent response shape produced by every loaded agent.
pub struct AgentOutput {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub tools_called: Vec<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

impl AgentOutput {
    pub fn from_text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            tools_called: Vec::new(),
            metadata: JsonMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One case execution inside one run.
pub struct CaseResult {
    pub id: String,
    pub run_id: String,
    pub case_id: String,
    pub case_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub score_details: ScoreDetails,
    pub passed: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CaseResult {
    /// Mean of the recorded scores; 0.0 when no scorer produced a value.
    pub fn avg_score(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.values().sum::<f64>() / self.scores.len() as f64
    }
}

/// Rounds half-away-from-zero to the requested number of decimal places.
pub fn round_to_places(value: f64, places: u32) -> f64 {
    let factor = 10_f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::{
        round_to_places, AgentOutput, CaseResult, ResultStatus, RunStatus, RunSummary, ScoreDetail,
        ScoreDetails,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_result(scores: BTreeMap<String, f64>) -> CaseResult {
        CaseResult {
            id: "result-1".to_string(),
            run_id: "run-1".to_string(),
            case_id: "case-1".to_string(),
            case_name: "capitals".to_string(),
            trace_run_id: None,
            trace_id: None,
            status: ResultStatus::Success,
            output: Some(AgentOutput::from_text("Paris")),
            scores,
            score_details: ScoreDetails::default(),
            passed: false,
            execution_time_ms: 12,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unit_run_status_round_trips_and_flags_terminal_states() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn unit_avg_score_is_zero_when_no_scores_recorded() {
        let result = sample_result(BTreeMap::new());
        assert_eq!(result.avg_score(), 0.0);
    }

    #[test]
    fn unit_avg_score_is_mean_of_recorded_scores() {
        let mut scores = BTreeMap::new();
        scores.insert("tool_selection".to_string(), 1.0);
        scores.insert("reasoning".to_string(), 0.5);
        let result = sample_result(scores);
        assert!((result.avg_score() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn unit_error_only_summary_round_trips_through_json() {
        let summary = RunSummary::from_error("agent load failed");
        let encoded = serde_json::to_value(&summary).expect("encode");
        assert_eq!(encoded["error"], "agent load failed");
        let decoded: RunSummary =
            serde_json::from_value(serde_json::json!({ "error": "agent load failed" }))
                .expect("decode");
        assert_eq!(decoded.error.as_deref(), Some("agent load failed"));
        assert_eq!(decoded.total_cases, 0);
    }

    #[test]
    fn unit_score_details_flatten_scorer_entries_beside_trace_summary() {
        let mut details = ScoreDetails::default();
        details.scorers.insert(
            "tool_selection".to_string(),
            ScoreDetail {
                score: 1.0,
                reason: "Excellent tool selection".to_string(),
                evidence: vec!["Tools called: [\"web_search\"]".to_string()],
            },
        );
        let encoded = serde_json::to_value(&details).expect("encode");
        assert_eq!(encoded["tool_selection"]["score"], 1.0);
        assert!(encoded.get("trace_summary").is_none());

        let decoded: ScoreDetails = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded.scorers.len(), 1);
    }

    #[test]
    fn unit_round_to_places_matches_summary_precision() {
        assert_eq!(round_to_places(0.123_456, 4), 0.1235);
        assert_eq!(round_to_places(66.666_7, 1), 66.7);
        assert_eq!(round_to_places(0.856, 2), 0.86);
    }
}
