//! Squadron
//!
//! Runs one task against a static agent registry and prints the job result
//! as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use squadron_core::config::load_config;
use squadron_core::descriptor::load_registry_file;
use squadron_core::tracing_init::{default_filter, init_tracing};
use squadron_core::{Config, Priority};
use squadron_runtime::agent;
use squadron_runtime::session::ProcessSessionHost;
use squadron_runtime::{Orchestrator, SubmitOptions, TaskTarget};

#[derive(Parser, Debug)]
#[command(name = "squadron")]
#[command(version, about = "Squadron - multi-agent task execution runtime")]
struct Args {
    /// Agent registry file (JSON). Defaults to `~/.squadron/agents.json`.
    #[arg(long, global = true, env = "SQUADRON_REGISTRY")]
    registry: Option<PathBuf>,

    /// Project directory whose `.squadron/settings.json` overrides the global config.
    #[arg(long, global = true, env = "SQUADRON_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn"). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "SQUADRON_LOG_JSON")]
    log_json: bool,

    /// Maximum concurrently executing attempts. Overrides the config file.
    #[arg(long, global = true)]
    max_concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a task and print the job result.
    Run(TaskArgs),
    /// Print the session plan a task would produce, without running it.
    Plan(TaskArgs),
    /// Initialize every agent and print the runtime status snapshot.
    Status,
}

#[derive(ClapArgs, Debug)]
struct TaskArgs {
    /// Task description, matched against agent capabilities.
    description: Option<String>,

    /// Comma-separated agent names; bypasses capability matching.
    #[arg(long, value_delimiter = ',')]
    agents: Vec<String>,

    /// JSON payload handed to every agent.
    #[arg(long, default_value = "null")]
    payload: String,

    #[arg(long, default_value = "medium")]
    priority: Priority,

    /// Time budget for the whole task, in seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Retry budget for this task; overrides agent and global settings.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Caller-supplied task id.
    #[arg(long)]
    task_id: Option<String>,

    /// Run each agent as a pane in a local process session instead of in-process.
    #[arg(long)]
    session: bool,

    /// Shell command each session pane runs (`sh -c`).
    #[arg(long, default_value = "cat", requires = "session")]
    pane_command: String,
}

impl TaskArgs {
    fn target(&self) -> anyhow::Result<TaskTarget> {
        if !self.agents.is_empty() {
            return Ok(TaskTarget::agents(&self.agents));
        }
        self.description
            .clone()
            .map(TaskTarget::Description)
            .ok_or_else(|| anyhow::anyhow!("Either a task description or --agents is required"))
    }

    fn payload(&self) -> anyhow::Result<Value> {
        serde_json::from_str(&self.payload)
            .map_err(|e| anyhow::anyhow!("--payload is not valid JSON: {e}"))
    }

    fn options(&self) -> SubmitOptions {
        let mut options = SubmitOptions::default().with_priority(self.priority);
        if let Some(secs) = self.deadline_secs {
            options = options.with_deadline(Duration::from_secs(secs));
        }
        if let Some(n) = self.max_retries {
            options = options.with_max_retries(n);
        }
        if let Some(id) = &self.task_id {
            options = options.with_task_id(id.as_str());
        }
        options
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match load_config(args.project_dir.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&default_filter("squadron_runtime", "info"), args.log_json);
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = &args.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(n) = args.max_concurrency {
        config.runtime.max_concurrency = n;
    }
    init_tracing(
        &default_filter("squadron_runtime", &config.log_level),
        args.log_json,
    );

    match run(args, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "squadron failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: Config) -> anyhow::Result<ExitCode> {
    let registry_path = match args.registry {
        Some(path) => path,
        None => default_registry_path()?,
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        registry = %registry_path.display(),
        max_concurrency = config.runtime.max_concurrency,
        "Starting squadron"
    );

    let terminate_grace = Duration::from_secs(config.session.terminate_grace_secs);
    let orchestrator = Orchestrator::new(config);
    orchestrator.register_agents(agent::from_registry(load_registry_file(&registry_path)?)?)?;

    if let Command::Plan(task) = &args.command {
        let plan = orchestrator.plan(task.target()?, task.payload()?, task.options())?;
        print_json(&plan)?;
        return Ok(ExitCode::SUCCESS);
    }

    orchestrator.initialize_all().await?;
    let outcome = execute(&orchestrator, &args.command, terminate_grace).await;

    let report = orchestrator.shutdown_all(None).await;
    if !report.cleanup_failures.is_empty() {
        warn!(failures = ?report.cleanup_failures, "Some agents failed to clean up");
    }
    outcome
}

/// Run the subcommand against an initialized runtime.
async fn execute(
    orchestrator: &Orchestrator,
    command: &Command,
    terminate_grace: Duration,
) -> anyhow::Result<ExitCode> {
    let task = match command {
        Command::Status => {
            print_json(&orchestrator.system_status())?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Plan(_) => return Ok(ExitCode::SUCCESS),
        Command::Run(task) => task,
    };

    let target = task.target()?;
    let payload = task.payload()?;
    let options = task.options();
    let host = task
        .session
        .then(|| ProcessSessionHost::shell(&task.pane_command, terminate_grace));

    let execution = async {
        match &host {
            Some(host) => {
                orchestrator
                    .execute_with_host(host, target, payload, options)
                    .await
            }
            None => orchestrator.execute_task(target, payload, options).await,
        }
    };

    let result = tokio::select! {
        result = execution => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            return Ok(ExitCode::from(130));
        }
    };
    let result = result?;
    print_json(&result)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[allow(clippy::print_stdout)]
fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Default registry path: ~/.squadron/agents.json
fn default_registry_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".squadron").join("agents.json"))
}
