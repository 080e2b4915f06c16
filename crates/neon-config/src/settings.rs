use std::path::{Path, PathBuf};

use serde::Deserialize;

use neon_types::EvalError;

fn default_database_path() -> PathBuf {
    PathBuf::from(".neon/results.db")
}

fn default_trace_tracking_uri() -> String {
    "http://localhost:5000".to_string()
}

fn default_judge_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_scoring_timeout_seconds() -> u64 {
    60
}

fn default_max_parallel_cases() -> usize {
    10
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_gateway_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
/// Engine settings, loaded from an optional TOML file with `NEON_*`
/// environment overrides applied on top. Passed explicitly into the
/// components that need them; never read from a global.
pub struct EngineSettings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_trace_tracking_uri")]
    pub trace_tracking_uri: String,
    #[serde(default)]
    pub trace_api_token: Option<String>,
    #[serde(default = "default_judge_api_base")]
    pub judge_api_base: String,
    #[serde(default)]
    pub judge_api_key: String,
    #[serde(default = "default_judge_model")]
    pub judge_model: String,
    #[serde(default = "default_scoring_timeout_seconds")]
    pub scoring_timeout_seconds: u64,
    #[serde(default = "default_max_parallel_cases")]
    pub max_parallel_cases: usize,
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_gateway_bind")]
    pub gateway_bind: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            trace_tracking_uri: default_trace_tracking_uri(),
            trace_api_token: None,
            judge_api_base: default_judge_api_base(),
            judge_api_key: String::new(),
            judge_model: default_judge_model(),
            scoring_timeout_seconds: default_scoring_timeout_seconds(),
            max_parallel_cases: default_max_parallel_cases(),
            default_timeout_seconds: default_timeout_seconds(),
            gateway_bind: default_gateway_bind(),
        }
    }
}

impl EngineSettings {
    /// Loads settings from `path` (when given) and applies env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, EvalError> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|error| {
                    EvalError::invalid(format!(
                        "failed to read settings file {}: {error}",
                        path.display()
                    ))
                })?;
                toml::from_str(&raw).map_err(|error| {
                    EvalError::invalid(format!(
                        "invalid settings file {}: {error}",
                        path.display()
                    ))
                })?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Settings from environment variables alone.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_var("NEON_DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = env_var("NEON_TRACE_TRACKING_URI") {
            self.trace_tracking_uri = value;
        }
        if let Some(value) = env_var("NEON_TRACE_API_TOKEN") {
            self.trace_api_token = Some(value);
        }
        if let Some(value) = env_var("NEON_JUDGE_API_BASE") {
            self.judge_api_base = value;
        }
        if let Some(value) = env_var("NEON_JUDGE_API_KEY") {
            self.judge_api_key = value;
        }
        if let Some(value) = env_var("NEON_JUDGE_MODEL") {
            self.judge_model = value;
        }
        if let Some(value) = env_parsed("NEON_SCORING_TIMEOUT_SECONDS") {
            self.scoring_timeout_seconds = value;
        }
        if let Some(value) = env_parsed("NEON_MAX_PARALLEL_CASES") {
            self.max_parallel_cases = value;
        }
        if let Some(value) = env_parsed("NEON_DEFAULT_TIMEOUT_SECONDS") {
            self.default_timeout_seconds = value;
        }
        if let Some(value) = env_var("NEON_GATEWAY_BIND") {
            self.gateway_bind = value;
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|value| value.parse().ok())
}
