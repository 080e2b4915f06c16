//! Configuration surfaces: suite definition files (YAML) and engine
//! settings (environment with optional TOML file override).

mod settings;
mod suite_file;

pub use settings::EngineSettings;
pub use suite_file::{load_suite_file, validate_suite_file, CaseFile, SuiteFile};
