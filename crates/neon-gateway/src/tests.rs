use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use neon_agent::{Agent, AgentRegistry};
use neon_runner::{OrchestratorConfig, RunOrchestrator};
use neon_scorers::{ScorerRegistry, ToolSelectionScorer};
use neon_store::SqliteEvalStore;
use neon_trace::InMemoryTraceBackend;
use neon_types::{AgentOutput, ApiKeyScope, JsonMap};

use crate::auth::{hash_api_key, StoreApiKeyAuthenticator};
use crate::server::{run_gateway_server, GatewayState};

const ADMIN_TOKEN: &str = "ae_test_admin_secret";
const READ_TOKEN: &str = "ae_test_read_secret";

struct StubAgent;

#[async_trait]
impl Agent for StubAgent {
    async fn run(&self, _query: &str, _context: &JsonMap) -> anyhow::Result<AgentOutput> {
        Ok(AgentOutput {
            output: "Paris is the capital of France".to_string(),
            tools_called: vec!["web_search".to_string()],
            metadata: JsonMap::new(),
        })
    }
}

struct TestGateway {
    base_url: String,
    client: reqwest::Client,
}

impl TestGateway {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn spawn_gateway() -> TestGateway {
    let store = Arc::new(SqliteEvalStore::open_in_memory().expect("open store"));
    let project = store
        .create_project("Demo", "demo", None)
        .await
        .expect("create project");
    store
        .provision_api_key(
            &project.id,
            "admin",
            "ae_test_admin",
            &hash_api_key(ADMIN_TOKEN),
            &[ApiKeyScope::Admin],
            None,
        )
        .await
        .expect("admin key");
    store
        .provision_api_key(
            &project.id,
            "reader",
            "ae_test_read",
            &hash_api_key(READ_TOKEN),
            &[ApiKeyScope::Read],
            None,
        )
        .await
        .expect("read key");

    let mut agents = AgentRegistry::new();
    agents.register_instance("demo", "agent", Arc::new(StubAgent));
    let mut scorers = ScorerRegistry::new();
    scorers.register(Arc::new(ToolSelectionScorer));

    let orchestrator = Arc::new(RunOrchestrator::new(
        store.clone(),
        Arc::new(agents),
        Arc::new(InMemoryTraceBackend::new()),
        Arc::new(scorers),
        OrchestratorConfig::default(),
    ));
    let state = Arc::new(GatewayState::new(
        store.clone(),
        orchestrator,
        Arc::new(StoreApiKeyAuthenticator::new(store)),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = run_gateway_server(listener, state).await;
    });

    TestGateway {
        base_url: format!("http://{address}"),
        client: reqwest::Client::new(),
    }
}

fn suite_body() -> Value {
    json!({
        "name": "capitals",
        "agent_id": "demo:agent",
        "config": {
            "parallel": true,
            "stop_on_failure": false,
            "default_scorers": ["tool_selection"],
            "default_min_score": 0.7,
            "default_timeout_seconds": 30
        },
        "cases": [
            {
                "name": "france",
                "input": { "query": "What is the capital of France?" },
                "expected_tools": ["web_search"]
            }
        ]
    })
}

async fn wait_for_terminal_run(gateway: &TestGateway, run_id: &str) -> Value {
    for _ in 0..100 {
        let run: Value = gateway
            .client
            .get(gateway.url(&format!("/api/v1/runs/{run_id}")))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("get run")
            .json()
            .await
            .expect("run json");
        let status = run["status"].as_str().unwrap_or_default().to_string();
        if status != "pending" && status != "running" {
            return run;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("run {run_id} did not reach a terminal state");
}

#[tokio::test]
async fn functional_health_needs_no_auth() {
    let gateway = spawn_gateway().await;
    let response = gateway
        .client
        .get(gateway.url("/healthz"))
        .send()
        .await
        .expect("health");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn functional_missing_or_unknown_token_is_unauthorized() {
    let gateway = spawn_gateway().await;
    let missing = gateway
        .client
        .get(gateway.url("/api/v1/suites"))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), 401);

    let unknown = gateway
        .client
        .get(gateway.url("/api/v1/suites"))
        .bearer_auth("ae_not_a_key")
        .send()
        .await
        .expect("request");
    assert_eq!(unknown.status(), 401);
}

#[tokio::test]
async fn functional_read_scope_cannot_create_suites() {
    let gateway = spawn_gateway().await;
    let response = gateway
        .client
        .post(gateway.url("/api/v1/suites"))
        .bearer_auth(READ_TOKEN)
        .json(&suite_body())
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn functional_suite_run_and_compare_flow_over_http() {
    let gateway = spawn_gateway().await;

    let suite: Value = gateway
        .client
        .post(gateway.url("/api/v1/suites"))
        .bearer_auth(ADMIN_TOKEN)
        .json(&suite_body())
        .send()
        .await
        .expect("create suite")
        .json()
        .await
        .expect("suite json");
    let suite_id = suite["id"].as_str().expect("suite id");

    let mut run_ids = Vec::new();
    for _ in 0..2 {
        let run: Value = gateway
            .client
            .post(gateway.url(&format!("/api/v1/suites/{suite_id}/runs")))
            .bearer_auth(ADMIN_TOKEN)
            .json(&json!({ "agent_version": "v1" }))
            .send()
            .await
            .expect("create run")
            .json()
            .await
            .expect("run json");
        let run_id = run["id"].as_str().expect("run id").to_string();
        let finished = wait_for_terminal_run(&gateway, &run_id).await;
        assert_eq!(finished["status"], "completed");
        assert_eq!(finished["summary"]["total_cases"], 1);
        assert_eq!(finished["summary"]["passed"], 1);
        run_ids.push(run_id);
    }

    let results: Value = gateway
        .client
        .get(gateway.url(&format!("/api/v1/runs/{}/results", run_ids[0])))
        .bearer_auth(READ_TOKEN)
        .send()
        .await
        .expect("results")
        .json()
        .await
        .expect("results json");
    assert_eq!(results.as_array().expect("array").len(), 1);
    assert_eq!(results[0]["case_name"], "france");
    assert_eq!(results[0]["passed"], true);

    let report: Value = gateway
        .client
        .post(gateway.url("/api/v1/compare"))
        .bearer_auth(READ_TOKEN)
        .json(&json!({
            "baseline_id": run_ids[0],
            "candidate_id": run_ids[1],
            "threshold": 0.05
        }))
        .send()
        .await
        .expect("compare")
        .json()
        .await
        .expect("compare json");
    assert_eq!(report["passed"], true);
    assert_eq!(report["regressions"].as_array().expect("array").len(), 0);

    let dashboard: Value = gateway
        .client
        .get(gateway.url("/api/v1/dashboard"))
        .bearer_auth(READ_TOKEN)
        .send()
        .await
        .expect("dashboard")
        .json()
        .await
        .expect("dashboard json");
    assert_eq!(dashboard["total_runs"], 2);
    assert_eq!(dashboard["passed_runs"], 2);
    assert_eq!(dashboard["pass_rate"], 100.0);
}

#[tokio::test]
async fn functional_unknown_status_filter_is_unprocessable() {
    let gateway = spawn_gateway().await;
    let response = gateway
        .client
        .get(gateway.url("/api/v1/runs?status=bogus"))
        .bearer_auth(READ_TOKEN)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn functional_missing_resources_return_not_found() {
    let gateway = spawn_gateway().await;
    let response = gateway
        .client
        .get(gateway.url("/api/v1/runs/absent-run"))
        .bearer_auth(READ_TOKEN)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
}
