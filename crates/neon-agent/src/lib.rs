//! Agent loading and adaptation for the evaluation engine.
//!
//! Maps the three incoming agent shapes (factory, object with `run`, plain
//! callable) onto one [`Agent`] interface at the boundary, so the runner and
//! scorers only ever see the unified contract. Locators use the
//! `module:attribute` grammar; a working directory can layer command-manifest
//! agents over the compiled-in registry for the duration of one load.

mod command_agent;
mod loader;
mod registry;

pub use command_agent::CommandAgent;
pub use loader::{load_agent, parse_locator};
pub use registry::{AgentBinding, AgentHandler, AgentInstance, AgentRegistry};

use async_trait::async_trait;
use neon_types::{AgentOutput, JsonMap};

#[async_trait]
/// The system under test: maps a query plus context to a textual output and
/// the record of tools it invoked.
pub trait Agent: Send + Sync {
    async fn run(&self, query: &str, context: &JsonMap) -> anyhow::Result<AgentOutput>;
}
