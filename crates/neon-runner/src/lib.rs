//! Run orchestration: schedules suite cases against a loaded agent under the
//! configured parallelism and failure policy, and owns the run lifecycle
//! state machine (pending → running → completed/failed/cancelled).

mod case_runner;
mod orchestrator;

pub use case_runner::CaseRunner;
pub use orchestrator::{
    resolve_working_dir, summarize_results, OrchestratorConfig, RunOrchestrator,
    DEFAULT_MAX_PARALLEL_CASES,
};
