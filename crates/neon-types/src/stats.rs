use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Dashboard aggregates computed in a single store round-trip.
pub struct DashboardStats {
    pub total_runs: u64,
    /// Completed runs with zero failed and zero errored cases.
    pub passed_runs: u64,
    /// Failed runs, plus completed runs with any failed or errored case.
    pub failed_runs: u64,
    /// Percentage of passed runs over total, one decimal place.
    pub pass_rate: f64,
    /// Percentage of failed runs over total, one decimal place.
    pub fail_rate: f64,
    /// Mean summary score over completed runs, two decimal places.
    pub avg_score: f64,
    /// Runs created in the trailing seven days, independent of date filters.
    pub runs_this_week: u64,
}
