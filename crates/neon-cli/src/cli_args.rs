use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Rendering style for command output.
pub enum OutputFormat {
    Table,
    Json,
    Markdown,
    Quiet,
}

#[derive(Debug, Parser)]
#[command(
    name = "neon",
    about = "Evaluate LLM agents against versioned test suites and gate deployments on regressions",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "table",
        help = "Output format"
    )]
    pub format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "NEON_DATABASE_PATH",
        help = "Path to the embedded results database (defaults to ~/.neon/results.db)"
    )]
    pub db: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "NEON_SETTINGS_FILE",
        help = "Optional TOML settings file; NEON_* environment variables override it"
    )]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage evaluation suites.
    Suite {
        #[command(subcommand)]
        command: SuiteCommand,
    },
    /// Start and inspect evaluation runs.
    Run {
        #[command(subcommand)]
        command: RunCommand,
    },
    /// Compare two runs for regressions.
    Compare {
        #[command(subcommand)]
        command: CompareCommand,
    },
    /// Serve the HTTP API over the configured store.
    Serve {
        #[arg(long, env = "NEON_GATEWAY_BIND", help = "Bind address for the gateway")]
        bind: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum SuiteCommand {
    /// List suites in the local project.
    List,
    /// Show one suite and its cases.
    Show {
        /// Suite name or id.
        suite: String,
    },
    /// Create (or refresh) a suite from a YAML definition.
    Create {
        /// Path to the suite YAML file.
        file: PathBuf,
    },
    /// Validate a suite YAML definition without persisting it.
    Validate {
        /// Path to the suite YAML file.
        file: PathBuf,
    },
    /// Delete a suite and everything under it.
    Delete {
        /// Suite name or id.
        suite: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum RunCommand {
    /// Load a suite file and execute it locally.
    Start {
        /// Path to the suite YAML file.
        file: PathBuf,
        #[arg(long, help = "Agent version label recorded on the run")]
        agent_version: Option<String>,
        #[arg(
            long,
            help = "Directory searched for <module>.agent.toml manifests (defaults to the current directory)"
        )]
        working_dir: Option<PathBuf>,
    },
    /// List recent runs.
    List {
        #[arg(long, help = "Filter by suite name")]
        suite: Option<String>,
        #[arg(long, default_value_t = 20, help = "Maximum rows shown")]
        limit: u32,
    },
    /// Show one run with its per-case results.
    Show {
        /// Run id.
        run_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum CompareCommand {
    /// Compare two runs by id ('latest' resolves the newest completed run).
    Runs {
        baseline: String,
        candidate: String,
        #[arg(long, default_value_t = 0.05, help = "Regression threshold in [0, 1]")]
        threshold: f64,
        #[arg(long, help = "Exit with status 1 when regressions are found")]
        fail_on_regression: bool,
    },
}
