use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;

use crate::backend::TraceBackend;
use crate::spans::CapturedTrace;

#[derive(Debug, Clone)]
/// Connection settings for the HTTP trace backend.
pub struct HttpTraceBackendConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for HttpTraceBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            api_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Trace backend client speaking the observability store's REST surface.
pub struct HttpTraceBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTraceBackend {
    pub fn new(config: HttpTraceBackendConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = config.api_token.as_deref().filter(|t| !t.trim().is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                    .context("invalid trace backend token")?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()
            .context("failed to build trace backend client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct OpenRunResponse {
    run_id: String,
}

#[async_trait]
impl TraceBackend for HttpTraceBackend {
    async fn open_run(
        &self,
        experiment: &str,
        run_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .post(self.url("/api/v1/trace-runs"))
            .json(&json!({
                "experiment": experiment,
                "run_name": run_name,
                "tags": tags,
            }))
            .send()
            .await
            .context("trace backend unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("trace backend returned {status}: {body}");
        }
        let opened: OpenRunResponse = response
            .json()
            .await
            .context("invalid open-run response from trace backend")?;
        Ok(opened.run_id)
    }

    async fn close_run(
        &self,
        run_id: &str,
        status: &str,
        execution_time_ms: u64,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/v1/trace-runs/{run_id}/close")))
            .json(&json!({
                "status": status,
                "execution_time_ms": execution_time_ms,
            }))
            .send()
            .await
            .context("trace backend unreachable")?;
        if !response.status().is_success() {
            anyhow::bail!("trace backend close returned {}", response.status());
        }
        Ok(())
    }

    async fn latest_trace(&self, run_id: &str) -> anyhow::Result<Option<CapturedTrace>> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/trace-runs/{run_id}/traces/latest")))
            .send()
            .await
            .context("trace backend unreachable")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("trace backend returned {}", response.status());
        }
        let trace: CapturedTrace = response
            .json()
            .await
            .context("invalid trace payload from trace backend")?;
        Ok(Some(trace))
    }
}
