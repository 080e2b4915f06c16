use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use neon_types::{CaseDraft, CaseInput, EvalError, SuiteConfig, SuiteDraft};

fn default_scorers() -> Vec<String> {
    vec!["tool_selection".to_string(), "reasoning".to_string()]
}

fn default_min_score() -> f64 {
    0.7
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_parallel() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Top-level shape of a suite definition file.
pub struct SuiteFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub agent_id: String,
    #[serde(default = "default_scorers")]
    pub default_scorers: Vec<String>,
    #[serde(default = "default_min_score")]
    pub default_min_score: f64,
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default)]
    pub stop_on_failure: bool,
    #[serde(default)]
    pub cases: Vec<CaseFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One case entry inside a suite definition file.
pub struct CaseFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input: CaseInput,
    #[serde(default)]
    pub expected_tools: Option<Vec<String>>,
    #[serde(default)]
    pub expected_tool_sequence: Option<Vec<String>>,
    #[serde(default)]
    pub expected_output_contains: Option<Vec<String>>,
    #[serde(default)]
    pub expected_output_pattern: Option<String>,
    /// Omitted means "use the suite defaults".
    #[serde(default)]
    pub scorers: Option<Vec<String>>,
    #[serde(default)]
    pub scorer_config: Option<Value>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SuiteFile {
    /// Converts the file shape into the store's create payload.
    pub fn into_draft(self) -> SuiteDraft {
        let config = SuiteConfig {
            parallel: self.parallel,
            stop_on_failure: self.stop_on_failure,
            default_scorers: self.default_scorers,
            default_min_score: self.default_min_score,
            default_timeout_seconds: self.default_timeout_seconds,
        };
        let cases = self
            .cases
            .into_iter()
            .map(|case| CaseDraft {
                name: case.name,
                description: case.description,
                input: case.input,
                expected_tools: case.expected_tools,
                expected_tool_sequence: case.expected_tool_sequence,
                expected_output_contains: case.expected_output_contains,
                expected_output_pattern: case.expected_output_pattern,
                scorers: case.scorers.unwrap_or_default(),
                scorer_config: case.scorer_config,
                min_score: case.min_score,
                timeout_seconds: case.timeout_seconds,
                tags: case.tags,
            })
            .collect();
        SuiteDraft {
            name: self.name,
            description: self.description,
            agent_id: self.agent_id,
            config,
            cases,
        }
    }
}

/// Loads and validates a suite file, or fails with the full error list.
pub fn load_suite_file(path: &Path, known_scorers: &[String]) -> Result<SuiteDraft, EvalError> {
    let errors = validate_suite_file(path, known_scorers);
    if !errors.is_empty() {
        return Err(EvalError::invalid(format!(
            "invalid suite file {}:\n{}",
            path.display(),
            errors.join("\n")
        )));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|error| EvalError::invalid(format!("failed to read {}: {error}", path.display())))?;
    let file: SuiteFile = serde_yaml::from_str(&raw)
        .map_err(|error| EvalError::invalid(format!("invalid suite file: {error}")))?;
    Ok(file.into_draft())
}

/// Validates a suite file and returns every problem found.
///
/// Syntax and schema errors carry the YAML line they were found at; semantic
/// errors reference the offending `cases[i]` entry.
pub fn validate_suite_file(path: &Path, known_scorers: &[String]) -> Vec<String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => return vec![format!("failed to read {}: {error}", path.display())],
    };

    let document: serde_yaml::Value = match serde_yaml::from_str(&raw) {
        Ok(document) => document,
        Err(error) => return vec![format_yaml_error("YAML syntax error", &error)],
    };
    if document.is_null() {
        return vec!["Empty or invalid YAML file".to_string()];
    }

    let file: SuiteFile = match serde_yaml::from_str(&raw) {
        Ok(file) => file,
        Err(error) => return vec![format_yaml_error("invalid suite schema", &error)],
    };

    let mut errors = Vec::new();
    if file.name.trim().is_empty() {
        errors.push("name: must not be empty".to_string());
    }
    if file.agent_id.trim().is_empty() {
        errors.push("agent_id: must not be empty".to_string());
    } else if !file.agent_id.contains(':') {
        errors.push(format!(
            "agent_id: '{}' is not in 'module:attribute' form",
            file.agent_id
        ));
    }
    if !(0.0..=1.0).contains(&file.default_min_score) {
        errors.push(format!(
            "default_min_score: {} is outside [0, 1]",
            file.default_min_score
        ));
    }
    for scorer in &file.default_scorers {
        if !known_scorers.iter().any(|known| known == scorer) {
            errors.push(format!("default_scorers: unknown scorer '{scorer}'"));
        }
    }

    let mut seen_names = std::collections::BTreeSet::new();
    for (index, case) in file.cases.iter().enumerate() {
        if case.name.trim().is_empty() {
            errors.push(format!("cases[{index}]: missing required field 'name'"));
        } else if !seen_names.insert(case.name.as_str()) {
            errors.push(format!(
                "cases[{index}]: duplicate case name '{}'",
                case.name
            ));
        }
        if let Some(min_score) = case.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                errors.push(format!(
                    "cases[{index}].min_score: {min_score} is outside [0, 1]"
                ));
            }
        }
        if case.timeout_seconds == Some(0) {
            errors.push(format!("cases[{index}].timeout_seconds: must be positive"));
        }
        if let Some(scorers) = &case.scorers {
            for scorer in scorers {
                if !known_scorers.iter().any(|known| known == scorer) {
                    errors.push(format!(
                        "cases[{index}].scorers: unknown scorer '{scorer}'"
                    ));
                }
            }
        }
    }
    errors
}

fn format_yaml_error(prefix: &str, error: &serde_yaml::Error) -> String {
    match error.location() {
        Some(location) => format!(
            "{prefix} at line {} column {}: {error}",
            location.line(),
            location.column()
        ),
        None => format!("{prefix}: {error}"),
    }
}
