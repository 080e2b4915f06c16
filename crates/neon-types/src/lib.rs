//! Shared domain model for the Neon agent-evaluation engine.
//!
//! Defines the persisted entities (projects, suites, cases, runs, results),
//! the scoring and trace summary records attached to them, the comparison
//! report shapes, and the error taxonomy used across every Neon crate.

pub mod auth;
pub mod compare;
pub mod drafts;
pub mod error;
pub mod eval;
pub mod stats;
pub mod trace;

pub use auth::{ApiKey, ApiKeyScope, RequestContext};
pub use compare::{CompareReport, RunReference, ScoreDelta};
pub use drafts::{CaseDraft, RunDraft, SuiteDraft};
pub use error::EvalError;
pub use eval::{
    round_to_places, AgentOutput, Case, CaseInput, CaseResult, Project, ResultStatus, Run,
    RunStatus, RunSummary, RunTrigger, ScoreDetail, ScoreDetails, Suite, SuiteConfig,
    DEFAULT_MIN_SCORE, DEFAULT_SCORERS, DEFAULT_TIMEOUT_SECONDS,
};
pub use stats::DashboardStats;
pub use trace::TraceSummary;

/// JSON object alias used for agent context and scorer configuration payloads.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
