use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use neon_core::new_entity_id;

use crate::spans::CapturedTrace;

#[async_trait]
/// External observability store reached over the network.
///
/// The engine treats every backend failure as non-fatal: a case result simply
/// carries no trace identifiers when the backend is unavailable.
pub trait TraceBackend: Send + Sync {
    /// Opens a traced scope under `experiment` and returns its run id.
    async fn open_run(
        &self,
        experiment: &str,
        run_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> anyhow::Result<String>;

    /// Closes a scope with its final status and wall-clock duration.
    async fn close_run(
        &self,
        run_id: &str,
        status: &str,
        execution_time_ms: u64,
    ) -> anyhow::Result<()>;

    /// Returns the trace the agent's own instrumentation emitted inside the
    /// scope, when one was captured.
    async fn latest_trace(&self, run_id: &str) -> anyhow::Result<Option<CapturedTrace>>;
}

#[derive(Debug, Clone)]
/// One opened scope, recorded for assertions.
pub struct RecordedTraceRun {
    pub run_id: String,
    pub experiment: String,
    pub run_name: String,
    pub tags: BTreeMap<String, String>,
    pub closed_status: Option<String>,
}

#[derive(Default)]
/// Backend used by tests and fully local CLI runs: scopes are recorded in
/// memory and traces are whatever the test queued up.
pub struct InMemoryTraceBackend {
    runs: Mutex<Vec<RecordedTraceRun>>,
    queued_traces: Mutex<VecDeque<CapturedTrace>>,
}

impl InMemoryTraceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a trace to be returned by the next `latest_trace` call.
    pub fn queue_trace(&self, trace: CapturedTrace) {
        self.queued_traces
            .lock()
            .expect("trace queue lock")
            .push_back(trace);
    }

    pub fn recorded_runs(&self) -> Vec<RecordedTraceRun> {
        self.runs.lock().expect("trace runs lock").clone()
    }
}

#[async_trait]
impl TraceBackend for InMemoryTraceBackend {
    async fn open_run(
        &self,
        experiment: &str,
        run_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        let run_id = new_entity_id();
        self.runs
            .lock()
            .map_err(|_| anyhow::anyhow!("trace run lock poisoned"))?
            .push(RecordedTraceRun {
                run_id: run_id.clone(),
                experiment: experiment.to_string(),
                run_name: run_name.to_string(),
                tags: tags.clone(),
                closed_status: None,
            });
        Ok(run_id)
    }

    async fn close_run(
        &self,
        run_id: &str,
        status: &str,
        _execution_time_ms: u64,
    ) -> anyhow::Result<()> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| anyhow::anyhow!("trace run lock poisoned"))?;
        if let Some(run) = runs.iter_mut().find(|run| run.run_id == run_id) {
            run.closed_status = Some(status.to_string());
        }
        Ok(())
    }

    async fn latest_trace(&self, _run_id: &str) -> anyhow::Result<Option<CapturedTrace>> {
        Ok(self
            .queued_traces
            .lock()
            .map_err(|_| anyhow::anyhow!("trace queue lock poisoned"))?
            .pop_front())
    }
}
