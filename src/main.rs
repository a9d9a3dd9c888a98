use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::join_all;

use taskpilot::config::Config;
use taskpilot::core::{TaskId, TaskStatus};
use taskpilot::orchestration::{LogSink, OrchestratorBuilder};
use taskpilot::report::Report;
use taskpilot::state::{load_snapshot, remove_task, JsonFileStore, Snapshot, TaskStore};
use taskpilot::util::format_duration_ms;
use taskpilot::{tlog, Error, Result, TaskApi};

/// Taskpilot - plan, run and report on multi-step tasks
#[derive(Parser, Debug)]
#[command(name = "taskpilot")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    TASKPILOT_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskpilot/taskpilot.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// State file to use instead of the configured one
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Plan and run one or more tasks, then print their reports
    Run {
        /// Task descriptions, one task each
        #[arg(required = true)]
        descriptions: Vec<String>,

        /// research, analysis, creation, automation or general
        #[arg(short, long, default_value = "general")]
        category: String,

        /// Override max_concurrent_tasks from the config
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Print raw JSON reports
        #[arg(long)]
        json: bool,
    },

    /// List stored tasks
    List {
        /// Only show tasks with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one task's progress
    Status { id: String },

    /// Show a task's report
    Report {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Counts by status
    Stats,

    /// Remove a task and its report
    Delete { id: String },

    /// Print the effective configuration
    Config {
        /// Write the defaults to ~/.taskpilot/taskpilot.toml
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskpilot::log::init_with_debug(cli.debug);

    let mut config = Config::load()?;
    if let Some(path) = &cli.state {
        config.state_path = Some(path.display().to_string());
    }
    tlog!("taskpilot {:?}", cli.command);

    match cli.command {
        Command::Run {
            descriptions,
            category,
            max_concurrent,
            json,
        } => {
            if let Some(n) = max_concurrent {
                config.max_concurrent_tasks = n;
            }
            run_tasks(&config, descriptions, &category, json)
        }
        Command::List { status } => run_list(&config, status),
        Command::Status { id } => run_status(&config, &id),
        Command::Report { id, json } => run_report(&config, &id, json),
        Command::Stats => run_stats(&config),
        Command::Delete { id } => run_delete(&config, &id),
        Command::Config { init } => run_config(&config, init),
    }
}

fn run_tasks(config: &Config, descriptions: Vec<String>, category: &str, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let orchestrator = OrchestratorBuilder::from_config(config)?
            .sink(Arc::new(LogSink))
            .build()
            .await?;
        let api = TaskApi::new(orchestrator.clone());

        let mut ids = Vec::new();
        for description in &descriptions {
            let created = api.create_task(description, category);
            if created["result"] != "success" {
                eprintln!("{}: {}", description, created["message"]);
                continue;
            }
            if let Some(id) = created["id"].as_str().and_then(|s| s.parse::<TaskId>().ok()) {
                println!("Queued {} ({})", id.short(), description);
                ids.push(id);
            }
        }

        let finished = join_all(ids.iter().map(|id| orchestrator.wait_for(*id))).await;
        orchestrator.wait_idle().await;

        for task in finished.into_iter().flatten() {
            match orchestrator.get_report(task.id) {
                Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
                Some(report) => print_report(&report),
                None => println!("{}: no report", task.id.short()),
            }
        }
        Ok::<(), Error>(())
    })
}

fn read_snapshot(config: &Config) -> Result<Snapshot> {
    let store: Arc<dyn TaskStore> = Arc::new(JsonFileStore::new(config.state_path()?));
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(load_snapshot(store))
}

fn parse_id(id: &str) -> Result<TaskId> {
    id.parse::<TaskId>()
        .map_err(|_| Error::Validation(format!("invalid task id: {}", id)))
}

fn run_list(config: &Config, status: Option<String>) -> Result<()> {
    let filter = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
    let mut tasks = read_snapshot(config)?.tasks;
    tasks.sort_by_key(|t| t.created_at);

    let shown: Vec<_> = tasks
        .iter()
        .filter(|t| filter.map_or(true, |f| t.status == f))
        .collect();
    if shown.is_empty() {
        println!("No tasks");
        return Ok(());
    }
    for task in shown {
        println!(
            "{}  {:<11} {:<10} {}/{}  {}",
            task.id.short(),
            task.status.to_string(),
            task.category.to_string(),
            task.completed_steps(),
            task.steps.len(),
            task.description
        );
    }
    Ok(())
}

fn run_status(config: &Config, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let snapshot = read_snapshot(config)?;
    let task = snapshot
        .tasks
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

    println!("Task {} [{}] {}", task.id, task.category, task.status);
    println!("  {}", task.description);
    for step in &task.steps {
        let took = step.duration_ms.map(format_duration_ms).unwrap_or_default();
        println!("  - {:<18} {:<11} {}", step.name, step.status.to_string(), took);
    }
    if task.retry_count > 0 {
        println!("  retries: {}/{}", task.retry_count, task.max_retries);
    }
    if let Some(error) = &task.error {
        println!("  error: {}", error);
    }
    Ok(())
}

fn run_report(config: &Config, id: &str, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let snapshot = read_snapshot(config)?;
    let report = snapshot
        .reports
        .iter()
        .find(|r| r.task_id == id)
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!();
    println!("Report {} [{}] {}", report.task_id.short(), report.category, report.status);
    println!(
        "  steps {}/{} ({} failed), retries {}, took {}",
        report.steps_completed,
        report.steps_total,
        report.steps_failed,
        report.retry_count,
        format_duration_ms(report.metrics.total_duration_ms)
    );
    println!("  {}", report.conclusion);
    for rec in &report.recommendations {
        println!("  * {}", rec);
    }
}

fn run_stats(config: &Config) -> Result<()> {
    let snapshot = read_snapshot(config)?;
    println!("Tasks: {}", snapshot.tasks.len());
    for status in [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Retrying,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ] {
        let n = snapshot.tasks.iter().filter(|t| t.status == status).count();
        println!("  {:<11} {}", status.to_string(), n);
    }
    println!("Reports: {}", snapshot.reports.len());
    Ok(())
}

fn run_delete(config: &Config, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let store: Arc<dyn TaskStore> = Arc::new(JsonFileStore::new(config.state_path()?));
    let rt = tokio::runtime::Runtime::new()?;
    if rt.block_on(remove_task(store, id))? {
        println!("Deleted {}", id.short());
        Ok(())
    } else {
        Err(Error::TaskNotFound(id.to_string()))
    }
}

fn run_config(config: &Config, init: bool) -> Result<()> {
    if init {
        Config::default().save()?;
        println!("Wrote {}", Config::config_path()?.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
