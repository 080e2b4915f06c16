use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use neon_types::JsonMap;

/// Maximum characters of raw judge text kept as a reason when no JSON could
/// be extracted.
const RAW_REASON_LIMIT: usize = 200;

#[derive(Debug, Clone)]
/// Parsed judge verdict: an integer 0-10 score, a one-line reason, and the
/// full response object for sub-scores and claim lists.
pub struct JudgeEvaluation {
    pub score: f64,
    pub reason: String,
    pub fields: JsonMap,
}

impl JudgeEvaluation {
    /// Neutral verdict returned when the judge response could not be parsed.
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            score: 5.0,
            reason: reason.into(),
            fields: JsonMap::new(),
        }
    }

    /// Parses the first balanced JSON object out of a judge completion.
    pub fn from_response_text(text: &str) -> Self {
        let parsed = extract_json_object(text)
            .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok());
        match parsed {
            Some(Value::Object(fields)) => {
                let score = fields.get("score").and_then(Value::as_f64).unwrap_or(5.0);
                let reason = fields
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("no reason given")
                    .to_string();
                Self {
                    score,
                    reason,
                    fields,
                }
            }
            _ => Self::neutral(truncate_chars(text.trim(), RAW_REASON_LIMIT)),
        }
    }

    /// 0-10 judge score normalized into the unit interval.
    pub fn normalized(&self) -> f64 {
        (self.score / 10.0).clamp(0.0, 1.0)
    }

    pub fn sub_score(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
/// Stateless LLM judge reached over the network.
///
/// Transport failures surface as errors so scorers can fall back to their
/// deterministic component; an unparseable completion is not an error and
/// yields the neutral verdict instead.
pub trait LlmJudge: Send + Sync {
    async fn evaluate(&self, prompt: &str) -> anyhow::Result<JudgeEvaluation>;
}

/// Returns the first balanced `{...}` substring, honoring JSON string
/// escapes, or `None` when no complete object is present.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, character) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match character {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + character.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[derive(Debug, Clone)]
/// Connection settings for the HTTP judge client.
pub struct LlmJudgeConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_ms: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmJudgeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            request_timeout_ms: 60_000,
            // Low temperature for consistent scoring.
            temperature: 0.1,
            max_output_tokens: 1024,
        }
    }
}

/// Judge client for OpenAI-compatible chat-completions endpoints.
pub struct HttpLlmJudge {
    client: reqwest::Client,
    config: LlmJudgeConfig,
}

impl HttpLlmJudge {
    pub fn new(config: LlmJudgeConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.trim().is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
                    .map_err(|error| anyhow::anyhow!("invalid judge API key header: {error}"))?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LlmJudge for HttpLlmJudge {
    async fn evaluate(&self, prompt: &str) -> anyhow::Result<JudgeEvaluation> {
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_output_tokens,
        });
        let response = self
            .client
            .post(self.completions_url())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("judge endpoint returned {status}: {body}");
        }
        let payload: Value = response.json().await?;
        let Some(content) = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        else {
            return Ok(JudgeEvaluation::neutral(
                "judge response carried no message content",
            ));
        };
        Ok(JudgeEvaluation::from_response_text(content))
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_json_object, JudgeEvaluation};

    #[test]
    fn unit_extract_json_object_returns_first_balanced_object() {
        let text = "Here is my verdict: {\"score\": 8, \"reason\": \"solid\"} trailing {\"x\": 1}";
        assert_eq!(
            extract_json_object(text),
            Some("{\"score\": 8, \"reason\": \"solid\"}")
        );
    }

    #[test]
    fn unit_extract_json_object_handles_nested_and_string_braces() {
        let text = "{\"reason\": \"uses { and } inside\", \"detail\": {\"score\": 2}}";
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn unit_extract_json_object_rejects_unbalanced_text() {
        assert_eq!(extract_json_object("{\"score\": 8"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn unit_unparseable_response_yields_neutral_verdict() {
        let evaluation = JudgeEvaluation::from_response_text("I refuse to answer in JSON");
        assert_eq!(evaluation.score, 5.0);
        assert_eq!(evaluation.normalized(), 0.5);
        assert!(evaluation.reason.contains("refuse"));
    }

    #[test]
    fn unit_parsed_response_exposes_sub_scores_and_lists() {
        let evaluation = JudgeEvaluation::from_response_text(
            r#"{"score": 9, "reason": "well grounded", "logical_coherence": 3,
                "strengths": ["clear steps", "cites sources"]}"#,
        );
        assert_eq!(evaluation.score, 9.0);
        assert_eq!(evaluation.sub_score("logical_coherence"), Some(3.0));
        assert_eq!(
            evaluation.string_list("strengths"),
            vec!["clear steps", "cites sources"]
        );
        assert!((evaluation.normalized() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unit_score_above_ten_is_clamped_by_normalization() {
        let evaluation = JudgeEvaluation::from_response_text(r#"{"score": 14, "reason": "r"}"#);
        assert_eq!(evaluation.normalized(), 1.0);
    }
}
