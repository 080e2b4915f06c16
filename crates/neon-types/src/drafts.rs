use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eval::{CaseInput, SuiteConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Payload for creating or replacing a suite.
pub struct SuiteDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub config: SuiteConfig,
    #[serde(default)]
    pub cases: Vec<CaseDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Payload for creating or replacing a case within a suite.
pub struct CaseDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input: CaseInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tool_sequence: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output_pattern: Option<String>,
    #[serde(default)]
    pub scorers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorer_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Payload for creating a run against an existing suite.
pub struct RunDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}
