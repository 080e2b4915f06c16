use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Summary statistics extracted from one captured execution trace.
pub struct TraceSummary {
    pub trace_id: String,
    pub total_spans: u64,
    #[serde(default)]
    pub tool_calls: Vec<String>,
    pub llm_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub duration_ms: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
