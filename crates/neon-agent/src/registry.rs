use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use neon_types::{AgentOutput, JsonMap};

use crate::Agent;

/// Plain callable shape: `(query, context) -> string | map`.
///
/// A bare string return becomes `{output, tools_called: [], metadata: {}}`;
/// a map return is shallow-merged with those defaults.
pub type AgentHandler = Arc<dyn Fn(&str, &JsonMap) -> anyhow::Result<Value> + Send + Sync>;

/// What a factory produces: either a full agent or a plain callable.
pub enum AgentInstance {
    Runner(Arc<dyn Agent>),
    Callable(AgentHandler),
}

/// One registered attribute inside an agent module.
#[derive(Clone)]
pub enum AgentBinding {
    /// Zero-argument constructor, instantiated at load time.
    Factory(Arc<dyn Fn() -> anyhow::Result<AgentInstance> + Send + Sync>),
    /// Object already exposing `run`.
    Instance(Arc<dyn Agent>),
    /// Plain callable, wrapped at load time.
    Handler(AgentHandler),
}

/// Compiled-in agent modules, keyed by dotted module name then attribute.
///
/// The registry is passed explicitly wherever agents are loaded; there is no
/// process-global module table.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    modules: BTreeMap<String, BTreeMap<String, AgentBinding>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        module: impl Into<String>,
        attribute: impl Into<String>,
        binding: AgentBinding,
    ) -> &mut Self {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(attribute.into(), binding);
        self
    }

    pub fn register_instance(
        &mut self,
        module: impl Into<String>,
        attribute: impl Into<String>,
        agent: Arc<dyn Agent>,
    ) -> &mut Self {
        self.register(module, attribute, AgentBinding::Instance(agent))
    }

    pub fn register_handler(
        &mut self,
        module: impl Into<String>,
        attribute: impl Into<String>,
        handler: AgentHandler,
    ) -> &mut Self {
        self.register(module, attribute, AgentBinding::Handler(handler))
    }

    pub fn register_factory(
        &mut self,
        module: impl Into<String>,
        attribute: impl Into<String>,
        factory: impl Fn() -> anyhow::Result<AgentInstance> + Send + Sync + 'static,
    ) -> &mut Self {
        self.register(module, attribute, AgentBinding::Factory(Arc::new(factory)))
    }

    pub fn module(&self, name: &str) -> Option<&BTreeMap<String, AgentBinding>> {
        self.modules.get(name)
    }
}

/// Adapter turning a plain callable into the unified agent interface.
pub(crate) struct CallableAgent {
    handler: AgentHandler,
}

impl CallableAgent {
    pub(crate) fn new(handler: AgentHandler) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Agent for CallableAgent {
    async fn run(&self, query: &str, context: &JsonMap) -> anyhow::Result<AgentOutput> {
        let value = (self.handler)(query, context)?;
        Ok(normalize_agent_value(value))
    }
}

/// Normalizes a callable's return value into the uniform output shape.
pub(crate) fn normalize_agent_value(value: Value) -> AgentOutput {
    match value {
        Value::String(text) => AgentOutput::from_text(text),
        Value::Object(map) => {
            let mut output = AgentOutput::default();
            let mut extras = JsonMap::new();
            for (key, entry) in map {
                match (key.as_str(), entry) {
                    ("output", Value::String(text)) => output.output = text,
                    ("output", other) => output.output = other.to_string(),
                    ("tools_called", Value::Array(items)) => {
                        output.tools_called = items
                            .into_iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect();
                    }
                    ("tools_called", Value::String(tool)) => output.tools_called = vec![tool],
                    ("metadata", Value::Object(metadata)) => {
                        output.metadata.extend(metadata);
                    }
                    (_, entry) => {
                        extras.insert(key, entry);
                    }
                }
            }
            output.metadata.extend(extras);
            output
        }
        other => AgentOutput::from_text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::normalize_agent_value;

    #[test]
    fn unit_string_return_becomes_bare_output() {
        let output = normalize_agent_value(json!("Paris is the capital of France"));
        assert_eq!(output.output, "Paris is the capital of France");
        assert!(output.tools_called.is_empty());
        assert!(output.metadata.is_empty());
    }

    #[test]
    fn unit_map_return_is_shallow_merged_with_defaults() {
        let output = normalize_agent_value(json!({
            "output": "Paris",
            "tools_called": ["web_search"],
            "latency_ms": 12,
        }));
        assert_eq!(output.output, "Paris");
        assert_eq!(output.tools_called, vec!["web_search"]);
        assert_eq!(output.metadata.get("latency_ms"), Some(&json!(12)));
    }

    #[test]
    fn unit_bare_tool_string_is_promoted_to_single_entry_list() {
        let output = normalize_agent_value(json!({
            "output": "done",
            "tools_called": "code_exec",
        }));
        assert_eq!(output.tools_called, vec!["code_exec"]);
    }

    #[test]
    fn unit_non_string_non_map_return_is_stringified() {
        let output = normalize_agent_value(json!(42));
        assert_eq!(output.output, "42");
    }
}
