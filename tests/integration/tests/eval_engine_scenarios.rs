use std::sync::Arc;

use async_trait::async_trait;

use neon_agent::{Agent, AgentRegistry};
use neon_compare::RunComparator;
use neon_config::load_suite_file;
use neon_runner::{OrchestratorConfig, RunOrchestrator};
use neon_scorers::{JudgeEvaluation, LlmJudge, ScorerRegistry};
use neon_store::SqliteEvalStore;
use neon_trace::InMemoryTraceBackend;
use neon_types::{AgentOutput, JsonMap, RunDraft, RunStatus, RunTrigger};

struct ScriptedAgent {
    reply: &'static str,
    tools: Vec<&'static str>,
    delay_ms: u64,
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn run(&self, _query: &str, _context: &JsonMap) -> anyhow::Result<AgentOutput> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        Ok(AgentOutput {
            output: self.reply.to_string(),
            tools_called: self.tools.iter().map(|tool| tool.to_string()).collect(),
            metadata: JsonMap::new(),
        })
    }
}

/// Judge returning a fixed 0-10 verdict so scores stay deterministic.
struct ScriptedJudge {
    score: f64,
}

#[async_trait]
impl LlmJudge for ScriptedJudge {
    async fn evaluate(&self, _prompt: &str) -> anyhow::Result<JudgeEvaluation> {
        Ok(JudgeEvaluation {
            score: self.score,
            reason: "scripted verdict".to_string(),
            fields: JsonMap::new(),
        })
    }
}

struct Engine {
    store: Arc<SqliteEvalStore>,
    orchestrator: Arc<RunOrchestrator>,
    project_id: String,
}

async fn engine_with_agent(agent: Arc<dyn Agent>, judge_score: f64) -> Engine {
    let store = Arc::new(SqliteEvalStore::open_in_memory().expect("open store"));
    let project = store
        .create_project("Demo", "demo", None)
        .await
        .expect("create project");
    engine_for_project(store, project.id, agent, judge_score)
}

fn engine_for_project(
    store: Arc<SqliteEvalStore>,
    project_id: String,
    agent: Arc<dyn Agent>,
    judge_score: f64,
) -> Engine {
    let mut agents = AgentRegistry::new();
    agents.register_instance("demo", "agent", agent);
    let scorers = Arc::new(ScorerRegistry::standard(Arc::new(ScriptedJudge {
        score: judge_score,
    })));
    let orchestrator = Arc::new(RunOrchestrator::new(
        store.clone(),
        Arc::new(agents),
        Arc::new(InMemoryTraceBackend::new()),
        scorers,
        OrchestratorConfig::default(),
    ));
    Engine {
        store,
        orchestrator,
        project_id,
    }
}

fn write_suite_yaml(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("suite.yaml");
    std::fs::write(&path, content).expect("write yaml");
    (dir, path)
}

fn known_scorers() -> Vec<String> {
    vec![
        "grounding".to_string(),
        "reasoning".to_string(),
        "tool_selection".to_string(),
    ]
}

async fn execute_suite_yaml(engine: &Engine, yaml: &str) -> (String, neon_types::Run) {
    let (_dir, path) = write_suite_yaml(yaml);
    let draft = load_suite_file(&path, &known_scorers()).expect("load suite");
    let suite = engine
        .store
        .create_suite(&engine.project_id, &draft)
        .await
        .expect("create suite");
    let run = engine
        .orchestrator
        .create_run(
            &engine.project_id,
            &suite.id,
            RunTrigger::Cli,
            &RunDraft::default(),
        )
        .await
        .expect("create run");
    let finished = engine
        .orchestrator
        .start_execution(&engine.project_id, &run.id, None)
        .await
        .expect("execute run");
    (suite.id, finished)
}

#[tokio::test]
async fn scenario_happy_path_two_cases_pass_with_full_scores() {
    let engine = engine_with_agent(
        Arc::new(ScriptedAgent {
            reply: "Paris is the capital of France",
            tools: vec!["web_search"],
            delay_ms: 0,
        }),
        10.0,
    )
    .await;

    let (_, run) = execute_suite_yaml(
        &engine,
        r#"
name: capitals
agent_id: demo:agent
default_scorers: [tool_selection]
cases:
  - name: france
    input:
      query: What is the capital of France?
    expected_tools: [web_search]
    expected_output_contains: [Paris]
    scorers: [tool_selection, grounding]
  - name: lookup
    input:
      query: Which tool finds capitals?
    expected_tools: [web_search]
"#,
    )
    .await;

    assert_eq!(run.status, RunStatus::Completed);
    let summary = run.summary.expect("summary");
    assert_eq!(summary.total_cases, 2);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.errored, 0);
    assert!(summary.avg_score > 0.99);

    let results = engine
        .store
        .list_results(&engine.project_id, &run.id, false)
        .await
        .expect("results");
    assert!(results.iter().all(|result| result.passed));
    let france = results
        .iter()
        .find(|result| result.case_name == "france")
        .expect("france result");
    assert_eq!(france.scores.get("tool_selection"), Some(&1.0));
    assert_eq!(france.scores.get("grounding"), Some(&1.0));
}

#[tokio::test]
async fn scenario_tool_choice_regression_is_gated_by_comparator() {
    let store = Arc::new(SqliteEvalStore::open_in_memory().expect("open store"));
    let project = store
        .create_project("Demo", "demo", None)
        .await
        .expect("create project");

    let suite_yaml = r#"
name: tool-choice
agent_id: demo:agent
default_scorers: [tool_selection]
cases:
  - name: lookup
    input:
      query: Find the capital of France
    expected_tools: [web_search]
"#;

    // Baseline: the agent picks the expected tool.
    let baseline_engine = engine_for_project(
        store.clone(),
        project.id.clone(),
        Arc::new(ScriptedAgent {
            reply: "found it",
            tools: vec!["web_search"],
            delay_ms: 0,
        }),
        10.0,
    );
    let (suite_id, baseline_run) = execute_suite_yaml(&baseline_engine, suite_yaml).await;
    assert_eq!(baseline_run.status, RunStatus::Completed);

    // Candidate: a new agent version reaches for the wrong tool.
    let candidate_engine = engine_for_project(
        store.clone(),
        project.id.clone(),
        Arc::new(ScriptedAgent {
            reply: "guessed instead",
            tools: vec!["code_exec"],
            delay_ms: 0,
        }),
        10.0,
    );
    let candidate_run = candidate_engine
        .orchestrator
        .create_run(&project.id, &suite_id, RunTrigger::Ci, &RunDraft::default())
        .await
        .expect("create candidate run");
    let candidate_run = candidate_engine
        .orchestrator
        .start_execution(&project.id, &candidate_run.id, None)
        .await
        .expect("execute candidate run");
    assert_eq!(candidate_run.status, RunStatus::Completed);

    let report = RunComparator::new(store)
        .compare(&project.id, &baseline_run.id, &candidate_run.id, 0.05)
        .await
        .expect("compare");
    assert!(!report.passed);
    assert_eq!(report.regressions.len(), 1);
    let regression = &report.regressions[0];
    assert_eq!(regression.case_name, "lookup");
    assert_eq!(regression.scorer, "tool_selection");
    assert!((regression.delta + 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn scenario_timeout_case_is_errored_with_descriptive_message() {
    let engine = engine_with_agent(
        Arc::new(ScriptedAgent {
            reply: "too late",
            tools: vec![],
            delay_ms: 5_000,
        }),
        10.0,
    )
    .await;

    let (_, run) = execute_suite_yaml(
        &engine,
        r#"
name: timeouts
agent_id: demo:agent
default_scorers: [tool_selection]
cases:
  - name: slow
    input:
      query: take your time
    timeout_seconds: 1
"#,
    )
    .await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.summary.expect("summary").errored, 1);

    let results = engine
        .store
        .list_results(&engine.project_id, &run.id, false)
        .await
        .expect("results");
    let result = &results[0];
    assert_eq!(result.status, neon_types::ResultStatus::Timeout);
    assert!(!result.passed);
    assert!(result.scores.is_empty());
    assert!(result.error.as_deref().expect("error").contains("1s"));
}

#[tokio::test]
async fn scenario_sequential_stop_on_failure_executes_one_case() {
    let engine = engine_with_agent(
        Arc::new(ScriptedAgent {
            reply: "wrong tool every time",
            tools: vec!["code_exec"],
            delay_ms: 0,
        }),
        10.0,
    )
    .await;

    let (_, run) = execute_suite_yaml(
        &engine,
        r#"
name: fail-fast
agent_id: demo:agent
parallel: false
stop_on_failure: true
default_scorers: [tool_selection]
cases:
  - name: first
    input:
      query: one
    expected_tools: [web_search]
  - name: second
    input:
      query: two
    expected_tools: [web_search]
  - name: third
    input:
      query: three
    expected_tools: [web_search]
"#,
    )
    .await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.summary.expect("summary").total_cases, 1);
    let results = engine
        .store
        .list_results(&engine.project_id, &run.id, false)
        .await
        .expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].case_name, "first");
}

#[tokio::test]
async fn scenario_cancel_during_running_keeps_partial_results() {
    let engine = engine_with_agent(
        Arc::new(ScriptedAgent {
            reply: "slowly",
            tools: vec!["web_search"],
            delay_ms: 300,
        }),
        10.0,
    )
    .await;

    let (_dir, path) = write_suite_yaml(
        r#"
name: cancellable
agent_id: demo:agent
parallel: false
default_scorers: [tool_selection]
cases:
  - name: one
    input: { query: q1 }
  - name: two
    input: { query: q2 }
  - name: three
    input: { query: q3 }
  - name: four
    input: { query: q4 }
"#,
    );
    let draft = load_suite_file(&path, &known_scorers()).expect("load suite");
    let suite = engine
        .store
        .create_suite(&engine.project_id, &draft)
        .await
        .expect("create suite");
    let run = engine
        .orchestrator
        .create_run(
            &engine.project_id,
            &suite.id,
            RunTrigger::Manual,
            &RunDraft::default(),
        )
        .await
        .expect("create run");

    let orchestrator = engine.orchestrator.clone();
    let project_id = engine.project_id.clone();
    let run_id = run.id.clone();
    let execution = tokio::spawn(async move {
        orchestrator
            .start_execution(&project_id, &run_id, None)
            .await
    });

    // Let the first case get underway, then cancel mid-run.
    tokio::time::sleep(std::time::Duration::from_millis(450)).await;
    assert!(engine
        .orchestrator
        .cancel_run(&engine.project_id, &run.id)
        .await
        .expect("cancel"));

    let finished = execution.await.expect("join").expect("execution");
    assert_eq!(finished.status, RunStatus::Cancelled);
    assert!(finished.completed_at.is_some());
    assert!(finished.summary.is_none());

    let results = engine
        .store
        .list_results(&engine.project_id, &run.id, false)
        .await
        .expect("results");
    // Results produced before the transition stay persisted; the schedule
    // stopped before reaching every case.
    assert!(!results.is_empty());
    assert!(results.len() < 4);
}

#[tokio::test]
async fn scenario_regex_content_match_combines_with_neutral_judge() {
    let engine = engine_with_agent(
        Arc::new(ScriptedAgent {
            reply: "Your order is ORD-54321 confirmed.",
            tools: vec![],
            delay_ms: 0,
        }),
        8.0,
    )
    .await;

    let (_, run) = execute_suite_yaml(
        &engine,
        r#"
name: orders
agent_id: demo:agent
default_scorers: [grounding]
cases:
  - name: order-confirmation
    input:
      query: What is the status of my order?
    expected_output_contains: [confirmed]
    expected_output_pattern: 'ORD-\d{5}'
    min_score: 0.8
"#,
    )
    .await;

    assert_eq!(run.status, RunStatus::Completed);
    let results = engine
        .store
        .list_results(&engine.project_id, &run.id, false)
        .await
        .expect("results");
    let score = *results[0].scores.get("grounding").expect("grounding score");
    // Deterministic component 1.0 at weight 0.3 plus judge 0.8 at weight 0.7.
    assert!((score - 0.86).abs() < 1e-9);
    assert!(results[0].passed);
}

#[tokio::test]
async fn scenario_suite_yaml_round_trips_through_the_store() {
    let engine = engine_with_agent(
        Arc::new(ScriptedAgent {
            reply: "unused",
            tools: vec![],
            delay_ms: 0,
        }),
        10.0,
    )
    .await;

    let (_dir, path) = write_suite_yaml(
        r#"
name: roundtrip
description: field fidelity check
agent_id: demo:agent
default_min_score: 0.65
default_timeout_seconds: 45
parallel: false
stop_on_failure: true
cases:
  - name: explicit
    description: fully specified case
    input:
      query: what gives?
      context:
        region: eu
    expected_tools: [web_search, calculator]
    expected_tool_sequence: [web_search, calculator]
    expected_output_contains: [sum]
    expected_output_pattern: '\d+'
    scorers: [tool_selection, grounding]
    min_score: 0.9
    timeout_seconds: 10
    tags: [smoke, math]
  - name: defaulted
    input:
      query: minimal case
"#,
    );
    let draft = load_suite_file(&path, &known_scorers()).expect("load suite");
    let suite = engine
        .store
        .create_suite(&engine.project_id, &draft)
        .await
        .expect("create suite");

    assert_eq!(suite.name, "roundtrip");
    assert_eq!(suite.description.as_deref(), Some("field fidelity check"));
    assert!(!suite.config.parallel);
    assert!(suite.config.stop_on_failure);
    assert_eq!(suite.config.default_min_score, 0.65);
    assert_eq!(suite.config.default_timeout_seconds, 45);

    let cases = engine
        .store
        .list_cases(&engine.project_id, &suite.id)
        .await
        .expect("cases");
    assert_eq!(cases.len(), 2);

    let explicit = &cases[0];
    assert_eq!(explicit.name, "explicit");
    assert_eq!(explicit.input.query, "what gives?");
    assert_eq!(
        explicit.input.context.get("region").and_then(|v| v.as_str()),
        Some("eu")
    );
    assert_eq!(
        explicit.expected_tools,
        Some(vec!["web_search".to_string(), "calculator".to_string()])
    );
    assert_eq!(
        explicit.expected_tool_sequence,
        Some(vec!["web_search".to_string(), "calculator".to_string()])
    );
    assert_eq!(explicit.expected_output_pattern.as_deref(), Some(r"\d+"));
    assert_eq!(explicit.scorers, vec!["tool_selection", "grounding"]);
    assert_eq!(explicit.min_score, 0.9);
    assert_eq!(explicit.timeout_seconds, 10);
    assert_eq!(explicit.tags, vec!["smoke", "math"]);

    // The minimal case picks up every suite-level default.
    let defaulted = &cases[1];
    assert_eq!(defaulted.min_score, 0.65);
    assert_eq!(defaulted.timeout_seconds, 45);
    assert_eq!(defaulted.scorers, vec!["tool_selection", "reasoning"]);
    assert!(defaulted.expected_tools.is_none());
}
