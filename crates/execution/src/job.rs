//! Daily batch driver for auto-processing.

use std::sync::Arc;

use chrono::NaiveDate;
use planwatch_core::{Clock, ProjectId};
use planwatch_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::orchestrator::{AutoProcessOptions, AutoProcessSummary, AutoProcessingOrchestrator};

/// Run-token name for the daily job.
pub const AUTO_PROCESSING_JOB: &str = "auto_processing";

/// Per-project results of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Day the batch ran for
    pub day: NaiveDate,
    /// Projects processed successfully
    pub succeeded: usize,
    /// Projects that failed
    pub failed: usize,
    /// Summaries of successful projects
    pub summaries: Vec<(ProjectId, AutoProcessSummary)>,
    /// Failure reasons
    pub failures: Vec<(ProjectId, String)>,
}

/// Outcome of [`DailyAutoProcessingJob::run`].
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// The job already ran on this day
    AlreadyRan(NaiveDate),
    /// The batch went through every eligible project
    Completed(BatchReport),
    /// Projects could not be listed
    Aborted(String),
}

/// Sequential sweep over execution-relevant projects, at most once per day.
pub struct DailyAutoProcessingJob {
    orchestrator: AutoProcessingOrchestrator,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    options: AutoProcessOptions,
    force: bool,
}

impl DailyAutoProcessingJob {
    /// Create a job sharing the orchestrator's storage and clock.
    pub fn new(orchestrator: AutoProcessingOrchestrator) -> Self {
        Self {
            storage: orchestrator.storage(),
            clock: orchestrator.clock(),
            orchestrator,
            options: AutoProcessOptions::default(),
            force: false,
        }
    }

    /// Set the remediation policy.
    pub fn with_options(mut self, options: AutoProcessOptions) -> Self {
        self.options = options;
        self
    }

    /// Ignore today's run token.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run the batch. Never fails: per-project problems are tallied in the
    /// report.
    pub async fn run(&self) -> BatchOutcome {
        let today = self.clock.today();

        if !self.force {
            match self.storage.load_run_token(AUTO_PROCESSING_JOB).await {
                Ok(Some(day)) if day == today => {
                    info!("Auto-processing already ran on {}", day);
                    return BatchOutcome::AlreadyRan(day);
                }
                Ok(_) => {}
                Err(e) => warn!("Could not read run token, running anyway: {}", e),
            }
        }

        let projects = match self.storage.list_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                warn!("Auto-processing aborted, cannot list projects: {}", e);
                return BatchOutcome::Aborted(e.to_string());
            }
        };

        let mut report = BatchReport {
            day: today,
            succeeded: 0,
            failed: 0,
            summaries: Vec::new(),
            failures: Vec::new(),
        };

        for project in projects.iter().filter(|p| p.status.is_execution_relevant()) {
            match self.orchestrator.run_auto_processing(project.id, &self.options).await {
                Ok(summary) if summary.success => {
                    if let Err(e) = self
                        .orchestrator
                        .aggregator()
                        .refresh_project_progress(project.id)
                        .await
                    {
                        warn!("Progress refresh failed for project '{}': {}", project.name, e);
                    }
                    report.succeeded += 1;
                    report.summaries.push((project.id, summary));
                }
                Ok(summary) => {
                    let reason = summary.error.unwrap_or_else(|| "run did not complete".to_string());
                    warn!("Auto-processing failed for project '{}': {}", project.name, reason);
                    report.failed += 1;
                    report.failures.push((project.id, reason));
                }
                Err(e) => {
                    warn!("Auto-processing failed for project '{}': {}", project.name, e);
                    report.failed += 1;
                    report.failures.push((project.id, e.to_string()));
                }
            }
        }

        if let Err(e) = self.save_token(today).await {
            warn!("Could not record run token: {}", e);
        }

        info!(
            "Auto-processing for {}: {} succeeded, {} failed",
            today, report.succeeded, report.failed
        );
        BatchOutcome::Completed(report)
    }

    async fn save_token(&self, day: NaiveDate) -> planwatch_storage::Result<()> {
        self.storage.save_run_token(AUTO_PROCESSING_JOB, day).await?;
        self.storage.commit(&format!("Record {} run for {}", AUTO_PROCESSING_JOB, day)).await?;
        debug!("Run token saved for {}", day);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use planwatch_core::{
        ChangeSet, DependencyId, FixedClock, Milestone, MilestoneId, Notification,
        NotificationFilter, ProgressLog, Project, ProjectStatus, Task, TaskDependency, TaskId,
        UserId,
    };
    use planwatch_storage::{MemoryStorage, Result, StorageError};

    /// Delegates to memory storage but fails task listing for one project.
    struct FlakyStorage {
        inner: MemoryStorage,
        broken: ProjectId,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn save_project(&self, project: &Project) -> Result<()> {
            self.inner.save_project(project).await
        }
        async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
            self.inner.load_project(id).await
        }
        async fn list_projects(&self) -> Result<Vec<Project>> {
            self.inner.list_projects().await
        }
        async fn save_task(&self, task: &Task) -> Result<()> {
            self.inner.save_task(task).await
        }
        async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
            self.inner.load_task(id).await
        }
        async fn tasks_by_project(&self, project_id: ProjectId) -> Result<Vec<Task>> {
            if project_id == self.broken {
                return Err(StorageError::Other("disk on fire".to_string()));
            }
            self.inner.tasks_by_project(project_id).await
        }
        async fn tasks_by_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<Task>> {
            self.inner.tasks_by_milestone(milestone_id).await
        }
        async fn save_milestone(&self, milestone: &Milestone) -> Result<()> {
            self.inner.save_milestone(milestone).await
        }
        async fn load_milestone(&self, id: MilestoneId) -> Result<Option<Milestone>> {
            self.inner.load_milestone(id).await
        }
        async fn save_dependency(&self, dependency: &TaskDependency) -> Result<()> {
            self.inner.save_dependency(dependency).await
        }
        async fn dependencies_for_tasks(&self, task_ids: &[TaskId]) -> Result<Vec<TaskDependency>> {
            self.inner.dependencies_for_tasks(task_ids).await
        }
        async fn delete_dependency(&self, id: DependencyId) -> Result<()> {
            self.inner.delete_dependency(id).await
        }
        async fn append_progress_log(&self, log: &ProgressLog) -> Result<()> {
            self.inner.append_progress_log(log).await
        }
        async fn progress_logs(&self, task_id: TaskId) -> Result<Vec<ProgressLog>> {
            self.inner.progress_logs(task_id).await
        }
        async fn save_notification(&self, notification: &Notification) -> Result<()> {
            self.inner.save_notification(notification).await
        }
        async fn list_notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
            self.inner.list_notifications(filter).await
        }
        async fn load_run_token(&self, job: &str) -> Result<Option<NaiveDate>> {
            self.inner.load_run_token(job).await
        }
        async fn save_run_token(&self, job: &str, day: NaiveDate) -> Result<()> {
            self.inner.save_run_token(job, day).await
        }
        async fn commit(&self, message: &str) -> Result<()> {
            self.inner.commit(message).await
        }
        async fn rollback(&self) -> Result<()> {
            self.inner.rollback().await
        }
        async fn apply(&self, changes: &ChangeSet, message: &str) -> Result<()> {
            self.inner.apply(changes, message).await
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 2, 0, 0).unwrap()))
    }

    async fn seed(storage: &dyn Storage, name: &str, status: ProjectStatus) -> Project {
        let mut project = Project::new(name, UserId::new("pm"));
        project.status = status;
        storage.save_project(&project).await.unwrap();
        let mut task = Task::new(project.id, "work");
        task.progress_percent = 40.0;
        storage.save_task(&task).await.unwrap();
        project
    }

    #[tokio::test]
    async fn test_failing_project_is_isolated() {
        let memory = MemoryStorage::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(seed(&memory, &format!("p{}", i), ProjectStatus::InProgress).await.id);
        }
        let broken = ids[2];
        let storage = Arc::new(FlakyStorage { inner: memory, broken });

        let orchestrator = AutoProcessingOrchestrator::new(storage.clone()).with_clock(clock());
        let report = match DailyAutoProcessingJob::new(orchestrator).run().await {
            BatchOutcome::Completed(report) => report,
            other => panic!("expected a completed batch, got {:?}", other),
        };
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, broken);
        assert!(report.failures[0].1.contains("disk on fire"));

        // Successful projects get their scheduled rollup.
        let refreshed = storage.load_project(ids[0]).await.unwrap().unwrap();
        assert_eq!(refreshed.progress_percent, 40.0);
        assert!(refreshed.progress_refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_runs_once_per_day() {
        let storage = Arc::new(MemoryStorage::new());
        seed(storage.as_ref(), "p", ProjectStatus::Planning).await;
        let clock = clock();
        let job = DailyAutoProcessingJob::new(
            AutoProcessingOrchestrator::new(storage.clone()).with_clock(clock.clone()),
        );

        assert!(matches!(job.run().await, BatchOutcome::Completed(ref r) if r.succeeded == 1));
        assert!(matches!(job.run().await, BatchOutcome::AlreadyRan(_)));

        clock.advance(Duration::days(1));
        assert!(matches!(job.run().await, BatchOutcome::Completed(_)));

        let forced = job.with_force(true);
        assert!(matches!(forced.run().await, BatchOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_skips_inactive_projects() {
        let storage = Arc::new(MemoryStorage::new());
        seed(storage.as_ref(), "active", ProjectStatus::InProgress).await;
        seed(storage.as_ref(), "paused", ProjectStatus::OnHold).await;
        seed(storage.as_ref(), "done", ProjectStatus::Completed).await;

        let job = DailyAutoProcessingJob::new(
            AutoProcessingOrchestrator::new(storage.clone()).with_clock(clock()),
        );
        let BatchOutcome::Completed(report) = job.run().await else {
            panic!("expected a completed batch");
        };
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
    }
}
