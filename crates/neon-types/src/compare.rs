use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Short reference to one side of a comparison.
pub struct RunReference {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One (case, scorer) pair whose score moved between the two runs.
pub struct ScoreDelta {
    pub case_name: String,
    pub scorer: String,
    pub baseline_score: f64,
    pub candidate_score: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Regression report produced by joining two completed runs case by case.
pub struct CompareReport {
    pub baseline: RunReference,
    pub candidate: RunReference,
    /// True when no regression exceeded the threshold.
    pub passed: bool,
    pub overall_delta: f64,
    /// Sorted ascending by delta: worst regression first.
    pub regressions: Vec<ScoreDelta>,
    /// Sorted descending by delta: best improvement first.
    pub improvements: Vec<ScoreDelta>,
    pub unchanged: u64,
    pub threshold: f64,
}
