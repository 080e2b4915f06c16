use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use neon_agent::AgentRegistry;
use neon_compare::RunComparator;
use neon_config::{load_suite_file, validate_suite_file, EngineSettings};
use neon_gateway::{run_gateway_server, GatewayState, StoreApiKeyAuthenticator};
use neon_runner::{OrchestratorConfig, RunOrchestrator};
use neon_scorers::{HttpLlmJudge, LlmJudgeConfig, ScorerRegistry};
use neon_store::SqliteEvalStore;
use neon_trace::{HttpTraceBackend, HttpTraceBackendConfig};
use neon_types::{
    EvalError, Project, Run, RunDraft, RunStatus, RunTrigger, Suite, SuiteDraft,
};

use crate::cli_args::{Cli, Command, CompareCommand, OutputFormat, RunCommand, SuiteCommand};
use crate::output;

/// Everything a local CLI invocation needs: an embedded store scoped to the
/// implicit `local` project, the standard scorer set, and an orchestrator
/// tracing under the local experiment naming.
pub struct LocalEngine {
    pub settings: EngineSettings,
    pub store: Arc<SqliteEvalStore>,
    pub project: Project,
    pub scorers: Arc<ScorerRegistry>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub comparator: RunComparator,
}

impl LocalEngine {
    pub async fn bootstrap(cli: &Cli, local_experiment: bool) -> Result<Self> {
        let settings = EngineSettings::load(cli.settings.as_deref())?;
        let database_path = resolve_database_path(cli.db.clone(), &settings);
        let store = Arc::new(SqliteEvalStore::open(&database_path)?);
        let project = match store.get_project_by_slug("local").await {
            Ok(project) => project,
            Err(EvalError::NotFound(_)) => store.create_project("Local", "local", None).await?,
            Err(error) => return Err(error.into()),
        };

        let judge = Arc::new(
            HttpLlmJudge::new(LlmJudgeConfig {
                api_base: settings.judge_api_base.clone(),
                api_key: settings.judge_api_key.clone(),
                model: settings.judge_model.clone(),
                request_timeout_ms: settings.scoring_timeout_seconds.saturating_mul(1_000),
                ..LlmJudgeConfig::default()
            })
            .context("failed to build LLM judge client")?,
        );
        let scorers = Arc::new(ScorerRegistry::standard(judge));
        let trace_backend = Arc::new(
            HttpTraceBackend::new(HttpTraceBackendConfig {
                base_url: settings.trace_tracking_uri.clone(),
                api_token: settings.trace_api_token.clone(),
                ..HttpTraceBackendConfig::default()
            })
            .context("failed to build trace backend client")?,
        );
        let orchestrator = Arc::new(RunOrchestrator::new(
            store.clone(),
            Arc::new(AgentRegistry::new()),
            trace_backend,
            scorers.clone(),
            OrchestratorConfig {
                max_parallel_cases: settings.max_parallel_cases,
                local_experiment,
            },
        ));
        let comparator = RunComparator::new(store.clone());

        Ok(Self {
            settings,
            store,
            project,
            scorers,
            orchestrator,
            comparator,
        })
    }
}

fn resolve_database_path(explicit: Option<PathBuf>, settings: &EngineSettings) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if std::env::var("NEON_DATABASE_PATH").is_ok() {
        return settings.database_path.clone();
    }
    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => {
            PathBuf::from(home).join(".neon").join("results.db")
        }
        _ => settings.database_path.clone(),
    }
}

/// Dispatches a parsed invocation and returns the process exit code.
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Suite { command } => execute_suite(&cli, command).await,
        Command::Run { command } => execute_run(&cli, command).await,
        Command::Compare { command } => execute_compare(&cli, command).await,
        Command::Serve { bind } => execute_serve(&cli, bind.clone()).await,
    }
}

async fn execute_suite(cli: &Cli, command: &SuiteCommand) -> Result<ExitCode> {
    match command {
        SuiteCommand::Validate { file } => {
            // Validation needs the scorer names but no store.
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let errors = validate_suite_file(file, &engine.scorers.names());
            if errors.is_empty() {
                if cli.format != OutputFormat::Quiet {
                    println!("{}: OK", file.display());
                }
                return Ok(ExitCode::SUCCESS);
            }
            for error in &errors {
                eprintln!("{error}");
            }
            Ok(ExitCode::from(1))
        }
        SuiteCommand::List => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let suites = engine.store.list_suites(&engine.project.id).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&suites)?),
                OutputFormat::Quiet => {
                    for suite in &suites {
                        println!("{}", suite.name);
                    }
                }
                OutputFormat::Table => println!(
                    "{}",
                    output::render_table(
                        &["name", "agent", "mode", "id"],
                        &output::suite_rows(&suites)
                    )
                ),
                OutputFormat::Markdown => println!(
                    "{}",
                    output::render_markdown_table(
                        &["name", "agent", "mode", "id"],
                        &output::suite_rows(&suites)
                    )
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        SuiteCommand::Show { suite } => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let suite = resolve_suite(&engine, suite).await?;
            let cases = engine
                .store
                .list_cases(&engine.project.id, &suite.id)
                .await?;
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "suite": suite,
                        "cases": cases,
                    }))?
                );
            } else {
                println!("suite {} ({})", suite.name, suite.id);
                println!("agent: {}", suite.agent_id);
                println!(
                    "mode: {}, stop_on_failure: {}, default_min_score: {}",
                    if suite.config.parallel {
                        "parallel"
                    } else {
                        "sequential"
                    },
                    suite.config.stop_on_failure,
                    suite.config.default_min_score,
                );
                let rows: Vec<Vec<String>> = cases
                    .iter()
                    .map(|case| {
                        vec![
                            case.name.clone(),
                            case.scorers.join(","),
                            format!("{}", case.min_score),
                            format!("{}s", case.timeout_seconds),
                        ]
                    })
                    .collect();
                println!(
                    "{}",
                    output::render_table(&["case", "scorers", "min_score", "timeout"], &rows)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        SuiteCommand::Create { file } => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let draft = load_suite_file(file, &engine.scorers.names())?;
            let suite = upsert_suite(&engine, &draft).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&suite)?),
                OutputFormat::Quiet => println!("{}", suite.id),
                _ => println!("suite '{}' saved ({})", suite.name, suite.id),
            }
            Ok(ExitCode::SUCCESS)
        }
        SuiteCommand::Delete { suite } => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let suite = resolve_suite(&engine, suite).await?;
            engine
                .store
                .delete_suite(&engine.project.id, &suite.id)
                .await?;
            if cli.format != OutputFormat::Quiet {
                println!("suite '{}' deleted", suite.name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn execute_run(cli: &Cli, command: &RunCommand) -> Result<ExitCode> {
    match command {
        RunCommand::Start {
            file,
            agent_version,
            working_dir,
        } => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let draft = load_suite_file(file, &engine.scorers.names())?;
            let suite = upsert_suite(&engine, &draft).await?;
            let run_draft = RunDraft {
                agent_version: agent_version.clone(),
                trigger_ref: current_git_sha(),
                config: None,
            };
            let run = engine
                .orchestrator
                .create_run(&engine.project.id, &suite.id, RunTrigger::Cli, &run_draft)
                .await?;
            let working_dir = neon_runner::resolve_working_dir(working_dir.clone());
            let finished = engine
                .orchestrator
                .start_execution(&engine.project.id, &run.id, working_dir.as_deref())
                .await?;
            render_run_detail(cli, &engine, &finished).await?;
            Ok(ExitCode::from(run_exit_code(&finished)))
        }
        RunCommand::List { suite, limit } => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let suite_id = match suite {
                Some(name) => Some(resolve_suite(&engine, name).await?.id),
                None => None,
            };
            let (runs, total) = engine
                .store
                .list_runs(&engine.project.id, suite_id.as_deref(), None, *limit, 0)
                .await?;
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "items": runs,
                        "total": total,
                    }))?
                ),
                OutputFormat::Quiet => {
                    for run in &runs {
                        println!("{}", run.id);
                    }
                }
                OutputFormat::Table => println!(
                    "{}",
                    output::render_table(
                        &["id", "suite", "status", "p/f/e", "agent", "created"],
                        &output::run_rows(&runs)
                    )
                ),
                OutputFormat::Markdown => println!(
                    "{}",
                    output::render_markdown_table(
                        &["id", "suite", "status", "p/f/e", "agent", "created"],
                        &output::run_rows(&runs)
                    )
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        RunCommand::Show { run_id } => {
            let engine = LocalEngine::bootstrap(cli, true).await?;
            let run = engine.store.get_run(&engine.project.id, run_id).await?;
            render_run_detail(cli, &engine, &run).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn execute_compare(cli: &Cli, command: &CompareCommand) -> Result<ExitCode> {
    let CompareCommand::Runs {
        baseline,
        candidate,
        threshold,
        fail_on_regression,
    } = command;
    if baseline == "latest" && candidate == "latest" {
        eprintln!("compare runs: baseline and candidate cannot both be 'latest'");
        return Ok(ExitCode::from(2));
    }
    let engine = LocalEngine::bootstrap(cli, true).await?;
    let baseline_id = resolve_run_reference(&engine, baseline).await?;
    let candidate_id = resolve_run_reference(&engine, candidate).await?;
    let report = engine
        .comparator
        .compare(&engine.project.id, &baseline_id, &candidate_id, *threshold)
        .await?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Quiet => {}
        OutputFormat::Table => {
            println!("{}", output::compare_headline(&report));
            if !report.regressions.is_empty() {
                println!("\nregressions:");
                println!(
                    "{}",
                    output::render_table(
                        &["case", "scorer", "baseline", "candidate", "delta"],
                        &output::delta_rows(&report.regressions)
                    )
                );
            }
            if !report.improvements.is_empty() {
                println!("\nimprovements:");
                println!(
                    "{}",
                    output::render_table(
                        &["case", "scorer", "baseline", "candidate", "delta"],
                        &output::delta_rows(&report.improvements)
                    )
                );
            }
        }
        OutputFormat::Markdown => {
            println!("## Run comparison\n");
            println!("{}\n", output::compare_headline(&report));
            if !report.regressions.is_empty() {
                println!("### Regressions\n");
                println!(
                    "{}\n",
                    output::render_markdown_table(
                        &["case", "scorer", "baseline", "candidate", "delta"],
                        &output::delta_rows(&report.regressions)
                    )
                );
            }
            if !report.improvements.is_empty() {
                println!("### Improvements\n");
                println!(
                    "{}\n",
                    output::render_markdown_table(
                        &["case", "scorer", "baseline", "candidate", "delta"],
                        &output::delta_rows(&report.improvements)
                    )
                );
            }
        }
    }

    if *fail_on_regression && !report.passed {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

async fn execute_serve(cli: &Cli, bind: Option<String>) -> Result<ExitCode> {
    let engine = LocalEngine::bootstrap(cli, false).await?;
    let bind = bind.unwrap_or_else(|| engine.settings.gateway_bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind gateway on {bind}"))?;
    let authenticator = Arc::new(StoreApiKeyAuthenticator::new(engine.store.clone()));
    let state = Arc::new(GatewayState::new(
        engine.store.clone(),
        engine.orchestrator.clone(),
        authenticator,
    ));
    run_gateway_server(listener, state).await?;
    Ok(ExitCode::SUCCESS)
}

async fn upsert_suite(engine: &LocalEngine, draft: &SuiteDraft) -> Result<Suite, EvalError> {
    match engine
        .store
        .get_suite_by_name(&engine.project.id, &draft.name)
        .await
    {
        Ok(existing) => {
            engine
                .store
                .update_suite(&engine.project.id, &existing.id, draft)
                .await?;
            engine
                .store
                .replace_cases(&engine.project.id, &existing.id, &draft.cases)
                .await?;
            engine.store.get_suite(&engine.project.id, &existing.id).await
        }
        Err(EvalError::NotFound(_)) => engine.store.create_suite(&engine.project.id, draft).await,
        Err(error) => Err(error),
    }
}

async fn resolve_suite(engine: &LocalEngine, reference: &str) -> Result<Suite, EvalError> {
    match engine.store.get_suite(&engine.project.id, reference).await {
        Ok(suite) => Ok(suite),
        Err(EvalError::NotFound(_)) => {
            engine
                .store
                .get_suite_by_name(&engine.project.id, reference)
                .await
        }
        Err(error) => Err(error),
    }
}

/// Resolves a run argument: `latest` means the newest completed run.
async fn resolve_run_reference(engine: &LocalEngine, reference: &str) -> Result<String> {
    if reference != "latest" {
        return Ok(reference.to_string());
    }
    let (runs, _) = engine
        .store
        .list_runs(
            &engine.project.id,
            None,
            Some(RunStatus::Completed),
            1,
            0,
        )
        .await?;
    runs.into_iter()
        .next()
        .map(|run| run.id)
        .context("no completed runs to use as 'latest'")
}

async fn render_run_detail(cli: &Cli, engine: &LocalEngine, run: &Run) -> Result<()> {
    let results = engine
        .store
        .list_results(&engine.project.id, &run.id, false)
        .await?;
    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run": run,
                "results": results,
            }))?
        ),
        OutputFormat::Quiet => println!("{}", run.id),
        _ => {
            println!(
                "run {} [{}] suite={}",
                run.id,
                run.status.as_str(),
                run.suite_name.as_deref().unwrap_or("-")
            );
            if let Some(summary) = &run.summary {
                if let Some(error) = &summary.error {
                    println!("error: {error}");
                } else {
                    println!(
                        "cases: {} passed, {} failed, {} errored (avg score {:.4}, {}ms)",
                        summary.passed,
                        summary.failed,
                        summary.errored,
                        summary.avg_score,
                        summary.execution_time_ms,
                    );
                }
            }
            if !results.is_empty() {
                let headers = ["case", "status", "verdict", "avg", "time", "error"];
                let rows = output::result_rows(&results);
                if cli.format == OutputFormat::Markdown {
                    println!("{}", output::render_markdown_table(&headers, &rows));
                } else {
                    println!("{}", output::render_table(&headers, &rows));
                }
            }
        }
    }
    Ok(())
}

/// Exit 0 only for a completed run whose cases all passed.
fn run_exit_code(run: &Run) -> u8 {
    if run.status != RunStatus::Completed {
        return 1;
    }
    match &run.summary {
        Some(summary) if summary.failed == 0 && summary.errored == 0 => 0,
        _ => 1,
    }
}

fn current_git_sha() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
