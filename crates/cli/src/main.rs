//! PlanWatch CLI - task progress, forecasts and dependency health.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use chrono::NaiveDate;
use planwatch_core::{
    Actor, DependencyType, Project, ProjectId, Task, TaskDependency, TaskId, UserId,
};
use planwatch_execution::{
    AutoProcessingOrchestrator, BatchOutcome, DailyAutoProcessingJob, LogNotifier, Notifier,
    WebhookNotifier,
};
use planwatch_progress::ProgressAggregator;
use planwatch_storage::{JsonStorage, Storage};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "planwatch")]
#[command(about = "Project task progress, forecasting and dependency health", long_about = None)]
struct Cli {
    /// Storage directory
    #[arg(long, default_value = ".planwatch", global = true)]
    root: PathBuf,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Acting user
    #[arg(long, default_value = "system", global = true)]
    user: String,

    /// Act with admin privileges
    #[arg(long, global = true)]
    admin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project
    AddProject {
        /// Project name
        name: String,
        /// Project manager
        #[arg(long)]
        manager: String,
    },
    /// Add a task to a project
    AddTask {
        /// Project ID
        project: String,
        /// Task name
        name: String,
        /// Planned start (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Planned end (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Rollup weight
        #[arg(long, default_value = "1.0")]
        weight: f64,
        /// Owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Make a task depend on another
    Depend {
        /// Successor task ID
        task: String,
        /// Predecessor task ID
        on: String,
        /// FS, SS, FF or SF
        #[arg(long, default_value = "FS")]
        kind: String,
        /// Lag in days
        #[arg(long, default_value = "0")]
        lag: i64,
    },
    /// Report progress on a task
    Update {
        /// Task ID
        task: String,
        /// New progress percent (0-100)
        percent: f64,
        /// Note for the progress log
        #[arg(long)]
        note: Option<String>,
    },
    /// Block a task
    Block {
        /// Task ID
        task: String,
        /// Reason
        reason: String,
    },
    /// Cancel a task
    Cancel {
        /// Task ID
        task: String,
    },
    /// Show a project forecast
    Forecast {
        /// Project ID
        project: String,
    },
    /// Show dependency cycles and issues
    Issues {
        /// Project ID
        project: String,
    },
    /// Run auto-processing for one project
    Auto {
        /// Project ID
        project: String,
        /// Block critical tasks over the delay threshold
        #[arg(long)]
        auto_block: bool,
        /// Reschedule successors violating dependency timing
        #[arg(long)]
        fix_timing: bool,
        /// Delay threshold in days
        #[arg(long)]
        threshold: Option<i64>,
        /// Do not send alerts
        #[arg(long)]
        no_notify: bool,
    },
    /// Run the daily batch over all active projects
    Daily {
        /// Run even if today's batch already ran
        #[arg(long)]
        force: bool,
    },
    /// Recompute project progress from its tasks
    Refresh {
        /// Project ID
        project: String,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let storage: Arc<dyn Storage> = Arc::new(JsonStorage::new(&cli.root).await?);
    let actor = if cli.admin {
        Actor::admin(UserId::new(cli.user.as_str()))
    } else {
        Actor::user(UserId::new(cli.user.as_str()))
    };

    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str())),
        None => Arc::new(LogNotifier),
    };
    let aggregator = ProgressAggregator::new(storage.clone())
        .with_gate_failure_policy(config.gate_failure_policy);
    let orchestrator = AutoProcessingOrchestrator::new(storage.clone())
        .with_aggregator(aggregator)
        .with_notifier(notifier);

    match cli.command {
        Commands::AddProject { name, manager } => {
            let project = Project::new(name, UserId::new(manager));
            storage.save_project(&project).await?;
            storage.commit("Add project").await?;
            println!("Added project: {} - {}", project.id, project.name);
        }
        Commands::AddTask { project, name, start, end, weight, owner } => {
            let project_id = parse_project(&project)?;
            if storage.load_project(project_id).await?.is_none() {
                return Err(anyhow!("Project {} not found", project_id));
            }
            let mut task = Task::new(project_id, name).with_weight(weight);
            task.plan_start = start;
            task.plan_end = end;
            if let Some(owner) = owner {
                task = task.with_owner(UserId::new(owner));
            }
            storage.save_task(&task).await?;
            storage.commit("Add task").await?;
            println!("Added task: {} - {}", task.id, task.name);
        }
        Commands::Depend { task, on, kind, lag } => {
            let dependency_type: DependencyType = kind.parse()?;
            let dep = TaskDependency::new(parse_task(&task)?, parse_task(&on)?, dependency_type, lag)?;
            storage.save_dependency(&dep).await?;
            storage.commit("Add dependency").await?;
            println!("Added dependency: {} ({})", dep.id, dep.dependency_type.label());
        }
        Commands::Update { task, percent, note } => {
            let task = orchestrator
                .update_task_progress(parse_task(&task)?, percent, &actor, note.as_deref())
                .await?;
            println!("{} | {} | {:.0}%", task.id, task.status, task.progress_percent);
        }
        Commands::Block { task, reason } => {
            let task = orchestrator
                .aggregator()
                .set_task_blocked(parse_task(&task)?, &reason, &actor)
                .await?;
            println!("{} | {} | {}", task.id, task.status, reason);
        }
        Commands::Cancel { task } => {
            let task = orchestrator.aggregator().cancel_task(parse_task(&task)?, &actor).await?;
            println!("{} | {}", task.id, task.status);
        }
        Commands::Forecast { project } => {
            let report = orchestrator.project_forecast(parse_project(&project)?).await?;
            println!("Progress: {:.1}%", report.current_progress);
            println!("  Predicted completion: {}", format_date(report.predicted_completion_date));
            println!("  Planned completion: {}", format_date(report.planned_completion_date));
            println!("  Delay: {} days", report.predicted_delay_days);
            println!("  Next 7 days: +{:.1}%", report.expected_gain_7d);
            println!("  Next 14 days: +{:.1}%", report.expected_gain_14d);
            println!("  Confidence: {:?}", report.confidence);
            println!("  Delayed tasks: {} (critical {})", report.delayed_tasks, report.critical_tasks);
        }
        Commands::Issues { project } => {
            let report = orchestrator.dependency_issues(parse_project(&project)?).await?;
            println!("Cycles ({})", report.cycles.len());
            for cycle in &report.cycles {
                println!("  {}", cycle);
            }
            println!("Issues ({})", report.issues.len());
            for issue in &report.issues {
                println!("  {:?} | {} | {}", issue.severity, issue.kind.as_str(), issue.detail);
            }
        }
        Commands::Auto { project, auto_block, fix_timing, threshold, no_notify } => {
            let mut options = config.options.clone();
            options.auto_block |= auto_block;
            options.auto_fix_timing |= fix_timing;
            if let Some(threshold) = threshold {
                options.delay_threshold_days = threshold;
            }
            if no_notify {
                options.send_notifications = false;
            }

            let summary = orchestrator
                .run_auto_processing(parse_project(&project)?, &options)
                .await?;
            if let Some(e) = &summary.error {
                return Err(anyhow!("{}", e));
            }
            println!(
                "blocked {} | risk {} | cycles {} | timing fixed {} | edges removed {} | errors {} | alerts {}",
                summary.blocked,
                summary.risk_tagged,
                summary.cycles_skipped,
                summary.timing_fixed,
                summary.missing_removed,
                summary.errors,
                summary.notifications_sent
            );
        }
        Commands::Daily { force } => {
            let job = DailyAutoProcessingJob::new(orchestrator)
                .with_options(config.options.clone())
                .with_force(force);
            match job.run().await {
                BatchOutcome::AlreadyRan(day) => println!("Already ran on {}", day),
                BatchOutcome::Completed(report) => {
                    println!("{}: {} succeeded, {} failed", report.day, report.succeeded, report.failed);
                    for (id, reason) in &report.failures {
                        println!("  {} | {}", id, reason);
                    }
                }
                BatchOutcome::Aborted(reason) => return Err(anyhow!("Batch aborted: {}", reason)),
            }
        }
        Commands::Refresh { project } => {
            let project = orchestrator
                .aggregator()
                .refresh_project_progress(parse_project(&project)?)
                .await?;
            info!("Refreshed {}", project.name);
            println!("{} | {:.1}%", project.id, project.progress_percent);
        }
    }

    Ok(())
}

fn parse_project(s: &str) -> Result<ProjectId> {
    s.parse().map_err(|_| anyhow!("Invalid project ID: {}", s))
}

fn parse_task(s: &str) -> Result<TaskId> {
    s.parse().map_err(|_| anyhow!("Invalid task ID: {}", s))
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}
