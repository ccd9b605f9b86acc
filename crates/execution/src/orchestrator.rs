//! Auto-processing orchestrator.
//!
//! One run per project:
//! ```text
//! Forecast → Block / Risk-tag → Analyze → Repair edges → Commit → Alert
//! ```
//! Every write of a run lands in a single commit, and alerts go out only
//! after that commit succeeded.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Duration;
use planwatch_core::{
    Actor, Anchor, Change, ChangeSet, Clock, Notification, NotificationFilter, NotificationId,
    Priority, ProgressLog, Project, ProjectId, SystemClock, Task, TaskDependency, TaskId,
    TaskStatus, Time, UserId,
};
use planwatch_progress::analyzer::{constrained_date, required_date};
use planwatch_progress::{
    DependencyGraphAnalyzer, DependencyReport, ForecastEngine, ForecastReport, IssueKind,
    ProgressAggregator, ProgressError, Result,
};
use planwatch_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::notifier::{LogNotifier, Notifier};

/// Notification kind used for dependency and schedule alerts.
pub const ALERT_KIND: &str = "project_risk_alert";

/// Source type recorded on project alerts.
pub const PROJECT_SOURCE: &str = "project";

/// Remediation policy for one auto-processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoProcessOptions {
    /// Block critical tasks whose predicted delay exceeds the threshold
    pub auto_block: bool,
    /// Delay (days) above which a critical task may be blocked
    pub delay_threshold_days: i64,
    /// Reschedule successors that violate a dependency constraint
    pub auto_fix_timing: bool,
    /// Delete edges whose predecessor no longer exists
    pub auto_fix_missing: bool,
    /// Alert the PM and affected owners
    pub send_notifications: bool,
    /// Look-back window for duplicate alerts, in hours
    pub debounce_hours: i64,
}

impl Default for AutoProcessOptions {
    fn default() -> Self {
        Self {
            auto_block: false,
            delay_threshold_days: 7,
            auto_fix_timing: false,
            auto_fix_missing: true,
            send_notifications: true,
            debounce_hours: 6,
        }
    }
}

/// Outcome of one project's run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoProcessSummary {
    /// Whether the run completed
    pub success: bool,
    /// Why the run did not complete
    pub error: Option<String>,
    /// Tasks auto-blocked
    pub blocked: usize,
    /// Tasks tagged as at risk
    pub risk_tagged: usize,
    /// Cycles left for a human
    pub cycles_skipped: usize,
    /// Timing conflicts repaired
    pub timing_fixed: usize,
    /// Dangling edges removed
    pub missing_removed: usize,
    /// Issues or deliveries that failed
    pub errors: usize,
    /// Alerts delivered
    pub notifications_sent: usize,
}

impl AutoProcessSummary {
    fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Composes forecasting, graph analysis and progress aggregation, and
/// applies the remediation policy to a project.
pub struct AutoProcessingOrchestrator {
    storage: Arc<dyn Storage>,
    aggregator: ProgressAggregator,
    analyzer: DependencyGraphAnalyzer,
    forecaster: ForecastEngine,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl AutoProcessingOrchestrator {
    /// Create an orchestrator that logs alerts and uses the system clock.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            aggregator: ProgressAggregator::new(storage.clone()),
            storage,
            analyzer: DependencyGraphAnalyzer::new(),
            forecaster: ForecastEngine::new(),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the alert channel.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the clock, for this orchestrator and its aggregator.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.aggregator = self.aggregator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Replace the progress aggregator.
    pub fn with_aggregator(mut self, aggregator: ProgressAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// The progress aggregator used for updates and rollups.
    pub fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    /// The backing store.
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    /// The clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Update a task's progress. See [`ProgressAggregator::update_task_progress`].
    pub async fn update_task_progress(
        &self,
        task_id: TaskId,
        new_percent: f64,
        actor: &Actor,
        note: Option<&str>,
    ) -> Result<Task> {
        self.aggregator
            .update_task_progress(task_id, new_percent, actor, note)
            .await
    }

    async fn load_project(&self, project_id: ProjectId) -> Result<Project> {
        self.storage
            .load_project(project_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("project {}", project_id)))
    }

    async fn load_logs(&self, tasks: &[Task]) -> Result<HashMap<TaskId, Vec<ProgressLog>>> {
        let mut logs = HashMap::with_capacity(tasks.len());
        for task in tasks {
            logs.insert(task.id, self.storage.progress_logs(task.id).await?);
        }
        Ok(logs)
    }

    async fn load_dependencies(&self, tasks: &HashMap<TaskId, Task>) -> Result<Vec<TaskDependency>> {
        let ids: Vec<TaskId> = tasks.keys().copied().collect();
        Ok(self.storage.dependencies_for_tasks(&ids).await?)
    }

    /// Forecast a project's completion from its non-cancelled tasks.
    pub async fn project_forecast(&self, project_id: ProjectId) -> Result<ForecastReport> {
        self.load_project(project_id).await?;
        let tasks: Vec<Task> = self
            .storage
            .tasks_by_project(project_id)
            .await?
            .into_iter()
            .filter(|t| t.status != TaskStatus::Cancelled)
            .collect();
        let logs = self.load_logs(&tasks).await?;
        Ok(self.forecaster.forecast_project(&tasks, &logs, self.clock.today()))
    }

    /// Analyze a project's dependency graph.
    pub async fn dependency_issues(&self, project_id: ProjectId) -> Result<DependencyReport> {
        self.load_project(project_id).await?;
        let tasks: HashMap<TaskId, Task> = self
            .storage
            .tasks_by_project(project_id)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let dependencies = self.load_dependencies(&tasks).await?;
        Ok(self.analyzer.analyze(&tasks, &dependencies))
    }

    /// Run forecasting and dependency remediation for one project.
    ///
    /// A missing project yields an unsuccessful summary rather than an
    /// error. Storage failures propagate.
    pub async fn run_auto_processing(
        &self,
        project_id: ProjectId,
        options: &AutoProcessOptions,
    ) -> Result<AutoProcessSummary> {
        let Some(project) = self.storage.load_project(project_id).await? else {
            warn!("Auto-processing skipped: project {} not found", project_id);
            return Ok(AutoProcessSummary::failed(format!("project {} not found", project_id)));
        };

        let tasks = self.storage.tasks_by_project(project_id).await?;
        let mut summary = AutoProcessSummary::succeeded();
        if tasks.is_empty() {
            debug!("Project '{}' has no tasks", project.name);
            return Ok(summary);
        }

        info!("Auto-processing project '{}' ({} tasks)", project.name, tasks.len());

        let now = self.clock.now();
        let mut working: HashMap<TaskId, Task> = tasks.into_iter().map(|t| (t.id, t)).collect();
        let mut touched: BTreeSet<TaskId> = BTreeSet::new();
        let mut changes = ChangeSet::new();

        // 1. Forecast remediation
        let mut live: Vec<Task> = working
            .values()
            .filter(|t| t.status != TaskStatus::Cancelled)
            .cloned()
            .collect();
        live.sort_by_key(|t| t.id);
        let logs = self.load_logs(&live).await?;
        let forecast = self.forecaster.forecast_project(&live, &logs, now.date_naive());

        for item in forecast.tasks.iter().filter(|f| f.critical) {
            let Some(task) = working.get_mut(&item.task_id) else {
                continue;
            };
            if task.is_closed() {
                continue;
            }

            if options.auto_block && item.delay_days > options.delay_threshold_days {
                let reason = format!("预测延迟 {} 天", item.delay_days);
                debug!("Blocking task '{}': {}", task.name, reason);
                task.status = TaskStatus::Blocked;
                task.block_reason = Some(reason.clone());
                task.updated_at = now;
                touched.insert(task.id);
                changes.push(Change::AppendProgressLog(ProgressLog::new(
                    task.id,
                    task.progress_percent,
                    format!("自动阻塞: {}", reason),
                    UserId::system(),
                    now,
                )));
                summary.blocked += 1;
            } else {
                debug!("Risk-tagging task '{}' (delay {}d)", task.name, item.delay_days);
                changes.push(Change::AppendProgressLog(ProgressLog::new(
                    task.id,
                    task.progress_percent,
                    format!("风险标记: 预测延迟 {} 天", item.delay_days),
                    UserId::system(),
                    now,
                )));
                summary.risk_tagged += 1;
            }
        }

        // 2. Dependency remediation
        let dependencies = self.load_dependencies(&working).await?;
        let report = self.analyzer.analyze(&working, &dependencies);
        summary.cycles_skipped = report.cycles.len();
        for cycle in &report.cycles {
            warn!("Dependency cycle in project '{}': {}", project.name, cycle);
        }

        let by_id: HashMap<_, &TaskDependency> = dependencies.iter().map(|d| (d.id, d)).collect();
        for issue in &report.issues {
            let outcome = match issue.kind {
                IssueKind::TimingConflict if options.auto_fix_timing => {
                    let on_cycle = report
                        .cycles
                        .iter()
                        .any(|c| c.contains(issue.task_id) && c.contains(issue.predecessor_id));
                    match by_id.get(&issue.dependency_id) {
                        Some(_) if on_cycle => Err(ProgressError::Structural(format!(
                            "edge {} lies on a dependency cycle",
                            issue.dependency_id
                        ))),
                        Some(dep) => realign_successor(dep, &mut working, now).map(|()| {
                            touched.insert(dep.task_id);
                            summary.timing_fixed += 1;
                        }),
                        None => Err(ProgressError::NotFound(format!(
                            "dependency {}",
                            issue.dependency_id
                        ))),
                    }
                }
                IssueKind::MissingPredecessor if options.auto_fix_missing => {
                    changes.push(Change::DeleteDependency(issue.dependency_id));
                    summary.missing_removed += 1;
                    Ok(())
                }
                _ => Ok(()),
            };

            if let Err(e) = outcome {
                warn!("Could not repair {} on task {}: {}", issue.kind.as_str(), issue.task_id, e);
                summary.errors += 1;
            }
        }

        // 3. Commit
        for id in &touched {
            if let Some(task) = working.get(id) {
                changes.push(Change::SaveTask(task.clone()));
            }
        }
        if !changes.is_empty() {
            self.storage
                .apply(&changes, &format!("Auto-process project {}", project.name))
                .await?;
        }

        // 4. Alerts
        if options.send_notifications && report.needs_attention() {
            self.dispatch_alerts(&project, &report, &working, options, now, &mut summary)
                .await?;
        }

        info!(
            "Project '{}': blocked {}, risk-tagged {}, cycles {}, timing fixed {}, edges removed {}, errors {}, alerts {}",
            project.name,
            summary.blocked,
            summary.risk_tagged,
            summary.cycles_skipped,
            summary.timing_fixed,
            summary.missing_removed,
            summary.errors,
            summary.notifications_sent
        );

        Ok(summary)
    }

    async fn dispatch_alerts(
        &self,
        project: &Project,
        report: &DependencyReport,
        tasks: &HashMap<TaskId, Task>,
        options: &AutoProcessOptions,
        now: Time,
        summary: &mut AutoProcessSummary,
    ) -> Result<()> {
        let high: Vec<_> = report.issues.iter().filter(|i| i.severity.is_high()).collect();

        let mut recipients = vec![project.manager_id.clone()];
        for issue in &high {
            for id in [issue.task_id, issue.predecessor_id] {
                if let Some(owner) = tasks.get(&id).and_then(|t| t.owner_id.clone()) {
                    if !recipients.contains(&owner) {
                        recipients.push(owner);
                    }
                }
            }
        }

        let priority = if report.cycles.is_empty() {
            Priority::High
        } else {
            Priority::Urgent
        };
        let title = format!("项目 {} 依赖风险", project.name);
        let mut body = format!(
            "{} cycle(s), {} high-severity issue(s)",
            report.cycles.len(),
            high.len()
        );
        for cycle in &report.cycles {
            body.push_str(&format!("\ncycle: {}", cycle));
        }
        for issue in &high {
            body.push_str(&format!("\n{}: {}", issue.kind.as_str(), issue.detail));
        }
        let extra = serde_json::json!({
            "cycles": report.cycles.len(),
            "high_issues": high.len(),
            "blocked": summary.blocked,
            "risk_tagged": summary.risk_tagged,
        });

        let since = now - Duration::hours(options.debounce_hours);
        let mut recorded = 0;
        for recipient in recipients {
            let filter = NotificationFilter {
                user_id: Some(recipient.clone()),
                kind: Some(ALERT_KIND.to_string()),
                source_type: Some(PROJECT_SOURCE.to_string()),
                source_id: Some(project.id.to_string()),
                since: Some(since),
            };
            if !self.storage.list_notifications(&filter).await?.is_empty() {
                debug!("Alert for {} on project '{}' debounced", recipient, project.name);
                continue;
            }

            let notification = Notification {
                id: NotificationId::new(),
                user_id: recipient,
                kind: ALERT_KIND.to_string(),
                title: title.clone(),
                body: body.clone(),
                source_type: PROJECT_SOURCE.to_string(),
                source_id: project.id.to_string(),
                priority,
                extra: extra.clone(),
                sent_at: now,
            };

            match self.notifier.send(&notification).await {
                Ok(()) => {
                    self.storage.save_notification(&notification).await?;
                    recorded += 1;
                }
                Err(e) => {
                    warn!("Alert to {} failed: {}", notification.user_id, e);
                    summary.errors += 1;
                }
            }
        }

        if recorded > 0 {
            self.storage
                .commit(&format!("Record {} alerts for project {}", recorded, project.name))
                .await?;
        }
        summary.notifications_sent += recorded;
        Ok(())
    }
}

/// Shift a successor's planned window so the constrained date meets the
/// requirement, keeping its planned duration.
fn realign_successor(
    dep: &TaskDependency,
    tasks: &mut HashMap<TaskId, Task>,
    now: Time,
) -> Result<()> {
    let predecessor = tasks
        .get(&dep.depends_on_task_id)
        .ok_or_else(|| ProgressError::NotFound(format!("task {}", dep.depends_on_task_id)))?;
    let required = required_date(dep, predecessor).ok_or_else(|| {
        ProgressError::Timing(format!("'{}' has no anchoring date", predecessor.name))
    })?;

    let successor = tasks
        .get_mut(&dep.task_id)
        .ok_or_else(|| ProgressError::NotFound(format!("task {}", dep.task_id)))?;
    let fixed_by_actuals = match dep.dependency_type.successor_anchor() {
        Anchor::Start => successor.actual_start.is_some(),
        Anchor::Finish => successor.actual_end.is_some(),
    };
    if fixed_by_actuals {
        return Err(ProgressError::Timing(format!(
            "'{}' already has actual dates and cannot be rescheduled",
            successor.name
        )));
    }
    let current = constrained_date(dep, successor).ok_or_else(|| {
        ProgressError::Timing(format!("'{}' has no planned dates", successor.name))
    })?;

    let shift = required - current;
    if shift <= Duration::zero() {
        // An earlier edge already moved it far enough.
        return Ok(());
    }

    successor.plan_start = successor.plan_start.map(|d| d + shift);
    successor.plan_end = successor.plan_end.map(|d| d + shift);
    successor.updated_at = now;
    debug!(
        "Rescheduled '{}' by {} days for {} edge {}",
        successor.name,
        shift.num_days(),
        dep.dependency_type.code(),
        dep.id
    );
    Ok(())
}
