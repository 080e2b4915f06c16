use serde::{Deserialize, Serialize};

use neon_types::{JsonMap, TraceSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Classification of a span inside a captured trace.
pub enum SpanKind {
    Tool,
    ChatModel,
    Chain,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Structured event attached to a span (exceptions, retries).
pub struct SpanEvent {
    pub name: String,
    #[serde(default)]
    pub attributes: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One span emitted by the agent's own instrumentation.
pub struct Span {
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    #[serde(default)]
    pub attributes: JsonMap,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Full trace as returned by the trace backend for one case execution.
pub struct CapturedTrace {
    pub trace_id: String,
    pub status: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// Token count attribute keys written by model-call instrumentation.
const TOKEN_COUNT_PROMPT: &str = "llm.token_count.prompt";
const TOKEN_COUNT_COMPLETION: &str = "llm.token_count.completion";
const TOKEN_COUNT_TOTAL: &str = "llm.token_count.total";

/// Walks the trace and folds spans into the persisted summary shape.
///
/// Tool spans contribute their names; chat-model spans contribute call and
/// token counts. An `ERROR` trace surfaces the root span's exception message.
pub fn extract_trace_summary(trace: &CapturedTrace) -> TraceSummary {
    let mut tool_calls = Vec::new();
    let mut llm_calls = 0_u64;
    let mut input_tokens = 0_u64;
    let mut output_tokens = 0_u64;
    let mut total_tokens = 0_u64;

    for span in &trace.spans {
        match span.kind {
            SpanKind::Tool => tool_calls.push(span.name.clone()),
            SpanKind::ChatModel => {
                llm_calls += 1;
                input_tokens += attribute_count(&span.attributes, TOKEN_COUNT_PROMPT);
                output_tokens += attribute_count(&span.attributes, TOKEN_COUNT_COMPLETION);
                total_tokens += attribute_count(&span.attributes, TOKEN_COUNT_TOTAL);
            }
            SpanKind::Chain | SpanKind::Unknown => {}
        }
    }

    let error = if trace.status == "ERROR" {
        root_exception_message(trace)
    } else {
        None
    };

    TraceSummary {
        trace_id: trace.trace_id.clone(),
        total_spans: trace.spans.len() as u64,
        tool_calls,
        llm_calls,
        input_tokens,
        output_tokens,
        total_tokens,
        duration_ms: trace.duration_ms,
        status: trace.status.clone(),
        error,
    }
}

fn attribute_count(attributes: &JsonMap, key: &str) -> u64 {
    attributes.get(key).and_then(|value| value.as_u64()).unwrap_or(0)
}

fn root_exception_message(trace: &CapturedTrace) -> Option<String> {
    let root = trace.spans.iter().find(|span| span.parent_id.is_none())?;
    root.events
        .iter()
        .find(|event| event.name == "exception")
        .and_then(|event| event.attributes.get("exception.message"))
        .and_then(|value| value.as_str())
        .map(str::to_string)
}
