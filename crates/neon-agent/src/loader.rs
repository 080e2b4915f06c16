use std::path::Path;
use std::sync::Arc;

use neon_types::EvalError;

use crate::command_agent::load_manifest_agent;
use crate::registry::{AgentBinding, AgentInstance, AgentRegistry, CallableAgent};
use crate::Agent;

/// Splits a `module:attribute` locator, rejecting malformed shapes.
///
/// `module` is a dotted identifier (`demo.agents`), `attribute` a single
/// identifier; both parts must be non-empty.
pub fn parse_locator(locator: &str) -> Result<(&str, &str), EvalError> {
    let Some((module, attribute)) = locator.split_once(':') else {
        return Err(EvalError::AgentLoad(format!(
            "invalid agent locator '{locator}': expected 'module:attribute' \
             (e.g. 'demo:agent' or 'demo.agents:research')"
        )));
    };
    let module_ok = !module.is_empty()
        && module
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(is_identifier_char));
    let attribute_ok = !attribute.is_empty() && attribute.chars().all(is_identifier_char);
    if !module_ok || !attribute_ok {
        return Err(EvalError::AgentLoad(format!(
            "invalid agent locator '{locator}': expected 'module:attribute'"
        )));
    }
    Ok((module, attribute))
}

fn is_identifier_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || character == '_'
}

/// Resolves a locator to a ready-to-run agent.
///
/// Resolution order: a factory is instantiated, an object with `run` is used
/// directly, and a plain callable is wrapped so string/map returns become the
/// uniform output shape. When `working_dir` is given it is consulted before
/// the registry, for this call only, by looking for a
/// `<module path>.agent.toml` command manifest under it.
pub fn load_agent(
    registry: &AgentRegistry,
    locator: &str,
    working_dir: Option<&Path>,
) -> Result<Arc<dyn Agent>, EvalError> {
    let (module, attribute) = parse_locator(locator)?;

    if let Some(dir) = working_dir {
        if let Some(agent) = load_manifest_agent(dir, module, attribute)? {
            tracing::debug!(locator, working_dir = %dir.display(), "loaded command agent");
            return Ok(agent);
        }
    }

    let Some(attributes) = registry.module(module) else {
        return Err(EvalError::AgentLoad(format!(
            "module '{module}' not found; register the agent module or pass a \
             working directory containing '{}.agent.toml'",
            module.replace('.', "/")
        )));
    };
    let Some(binding) = attributes.get(attribute) else {
        return Err(EvalError::AgentLoad(format!(
            "attribute '{attribute}' not found in module '{module}'. Available: {}",
            describe_available(attributes.keys().map(String::as_str))
        )));
    };

    match binding {
        AgentBinding::Factory(factory) => match factory() {
            Ok(AgentInstance::Runner(agent)) => Ok(agent),
            Ok(AgentInstance::Callable(handler)) => Ok(Arc::new(CallableAgent::new(handler))),
            Err(error) => Err(EvalError::AgentLoad(format!(
                "failed to instantiate '{module}:{attribute}': {error}"
            ))),
        },
        AgentBinding::Instance(agent) => Ok(agent.clone()),
        AgentBinding::Handler(handler) => Ok(Arc::new(CallableAgent::new(handler.clone()))),
    }
}

/// Formats up to ten attribute names for load-error messages.
fn describe_available<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    if names.is_empty() {
        return "(none)".to_string();
    }
    let shown = names.iter().take(10).copied().collect::<Vec<_>>().join(", ");
    if names.len() > 10 {
        format!("{shown}, ... ({} more)", names.len() - 10)
    } else {
        shown
    }
}
