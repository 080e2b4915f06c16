use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use neon_types::{AgentOutput, EvalError, JsonMap};

use crate::registry::normalize_agent_value;
use crate::Agent;

#[derive(Debug, Deserialize)]
struct AgentManifest {
    #[serde(default)]
    agents: BTreeMap<String, CommandSpec>,
}

#[derive(Debug, Deserialize)]
struct CommandSpec {
    command: Vec<String>,
}

/// Agent backed by an external process declared in a command manifest.
///
/// The child receives `{"query": ..., "context": ...}` as JSON on stdin and
/// must print its response to stdout: either a JSON object in the uniform
/// output shape or plain text.
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandAgent {
    pub fn new(program: String, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            program,
            args,
            working_dir,
        }
    }
}

#[async_trait]
impl Agent for CommandAgent {
    async fn run(&self, query: &str, context: &JsonMap) -> anyhow::Result<AgentOutput> {
        let payload = serde_json::json!({ "query": query, "context": context });
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn agent process '{}'", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .context("agent process stdin unavailable")?;
        let encoded = serde_json::to_string(&payload).context("failed to encode agent input")?;
        stdin
            .write_all(encoded.as_bytes())
            .await
            .context("failed to write agent input")?;
        stdin
            .write_all(b"\n")
            .await
            .context("failed to write agent input")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("agent process '{}' did not complete", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "agent process '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => Ok(normalize_agent_value(value)),
            Err(_) => Ok(AgentOutput::from_text(trimmed)),
        }
    }
}

/// Resolves an attribute from the `<module path>.agent.toml` manifest under
/// `working_dir`, when such a manifest exists.
pub(crate) fn load_manifest_agent(
    working_dir: &Path,
    module: &str,
    attribute: &str,
) -> Result<Option<Arc<dyn Agent>>, EvalError> {
    let manifest_path = working_dir.join(format!("{}.agent.toml", module.replace('.', "/")));
    if !manifest_path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&manifest_path).map_err(|error| {
        EvalError::AgentLoad(format!(
            "failed to read agent manifest {}: {error}",
            manifest_path.display()
        ))
    })?;
    let manifest: AgentManifest = toml::from_str(&raw).map_err(|error| {
        EvalError::AgentLoad(format!(
            "invalid agent manifest {}: {error}",
            manifest_path.display()
        ))
    })?;

    let Some(spec) = manifest.agents.get(attribute) else {
        let available: Vec<&str> = manifest.agents.keys().map(String::as_str).take(10).collect();
        return Err(EvalError::AgentLoad(format!(
            "attribute '{attribute}' not found in manifest {}. Available: {}",
            manifest_path.display(),
            if available.is_empty() {
                "(none)".to_string()
            } else {
                available.join(", ")
            }
        )));
    };
    let Some((program, args)) = spec.command.split_first() else {
        return Err(EvalError::AgentSignature(format!(
            "agent '{module}:{attribute}' declares an empty command"
        )));
    };
    Ok(Some(Arc::new(CommandAgent::new(
        program.clone(),
        args.to_vec(),
        working_dir.to_path_buf(),
    ))))
}

#[cfg(test)]
mod tests {
    use neon_types::{EvalError, JsonMap};

    use crate::loader::load_agent;
    use crate::registry::AgentRegistry;

    fn write_manifest(dir: &std::path::Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create manifest dir");
        }
        std::fs::write(path, content).expect("write manifest");
    }

    #[tokio::test]
    async fn functional_manifest_agent_round_trips_json_over_stdio() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            tempdir.path(),
            "demo.agent.toml",
            r#"
            [agents.search]
            command = [
                "sh",
                "-c",
                "cat > /dev/null; echo '{\"output\": \"Paris\", \"tools_called\": [\"web_search\"]}'",
            ]
            "#,
        );
        let registry = AgentRegistry::new();
        let agent =
            load_agent(&registry, "demo:search", Some(tempdir.path())).expect("load manifest");
        let output = agent
            .run("capital of France?", &JsonMap::new())
            .await
            .expect("run");
        assert_eq!(output.output, "Paris");
        assert_eq!(output.tools_called, vec!["web_search"]);
    }

    #[tokio::test]
    async fn functional_manifest_agent_plain_text_output_is_wrapped() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            tempdir.path(),
            "demo/nested.agent.toml",
            r#"
            [agents.plain]
            command = ["sh", "-c", "cat > /dev/null; echo 'just text'"]
            "#,
        );
        let registry = AgentRegistry::new();
        let agent =
            load_agent(&registry, "demo.nested:plain", Some(tempdir.path())).expect("load");
        let output = agent.run("q", &JsonMap::new()).await.expect("run");
        assert_eq!(output.output, "just text");
        assert!(output.tools_called.is_empty());
    }

    #[test]
    fn functional_manifest_missing_attribute_lists_available() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            tempdir.path(),
            "demo.agent.toml",
            r#"
            [agents.search]
            command = ["true"]
            "#,
        );
        let registry = AgentRegistry::new();
        let Err(error) = load_agent(&registry, "demo:absent", Some(tempdir.path())) else {
            panic!("should fail")
        };
        assert!(error.to_string().contains("search"));
    }

    #[test]
    fn functional_empty_command_is_a_signature_error() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            tempdir.path(),
            "demo.agent.toml",
            r#"
            [agents.broken]
            command = []
            "#,
        );
        let registry = AgentRegistry::new();
        let Err(error) = load_agent(&registry, "demo:broken", Some(tempdir.path())) else {
            panic!("should fail")
        };
        assert!(matches!(error, EvalError::AgentSignature(_)));
    }

    #[test]
    fn regression_missing_manifest_falls_back_to_registry_lookup() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let registry = AgentRegistry::new();
        let Err(error) = load_agent(&registry, "demo:absent", Some(tempdir.path())) else {
            panic!("should fail")
        };
        assert!(matches!(error, EvalError::AgentLoad(_)));
        assert!(error.to_string().contains("module 'demo' not found"));
    }
}
