//! Storage trait abstraction.

use async_trait::async_trait;
use chrono::NaiveDate;
use planwatch_core::{
    Change, ChangeSet, DependencyId, Milestone, MilestoneId, Notification, NotificationFilter,
    ProgressLog, Project, ProjectId, Task, TaskDependency, TaskId,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Storage abstraction for PlanWatch data.
///
/// All methods take `&self` so one backend can be shared behind an `Arc`
/// by the aggregator, the orchestrator and the daily job. Backends handle
/// their own interior locking.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Project operations ===

    /// Save a project (create or update).
    async fn save_project(&self, project: &Project) -> Result<()>;

    /// Load a project by ID.
    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>>;

    /// List all projects.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    // === Task operations ===

    /// Save a task (create or update).
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Load a task by ID.
    async fn load_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// All tasks of a project.
    async fn tasks_by_project(&self, project_id: ProjectId) -> Result<Vec<Task>>;

    /// All tasks attached to a milestone.
    async fn tasks_by_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<Task>>;

    // === Milestone operations ===

    /// Save a milestone (create or update).
    async fn save_milestone(&self, milestone: &Milestone) -> Result<()>;

    /// Load a milestone by ID.
    async fn load_milestone(&self, id: MilestoneId) -> Result<Option<Milestone>>;

    // === Dependency operations ===

    /// Save a dependency edge.
    async fn save_dependency(&self, dependency: &TaskDependency) -> Result<()>;

    /// Edges whose successor is one of `task_ids`.
    async fn dependencies_for_tasks(&self, task_ids: &[TaskId]) -> Result<Vec<TaskDependency>>;

    /// Delete a dependency edge. Deleting a missing edge is not an error.
    async fn delete_dependency(&self, id: DependencyId) -> Result<()>;

    // === Progress history ===

    /// Append a progress log entry.
    async fn append_progress_log(&self, log: &ProgressLog) -> Result<()>;

    /// Progress log entries for a task, oldest first.
    async fn progress_logs(&self, task_id: TaskId) -> Result<Vec<ProgressLog>>;

    // === Notifications ===

    /// Record a sent notification.
    async fn save_notification(&self, notification: &Notification) -> Result<()>;

    /// Sent notifications matching the filter.
    async fn list_notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>>;

    // === Scheduled job bookkeeping ===

    /// The last day a named job completed.
    async fn load_run_token(&self, job: &str) -> Result<Option<NaiveDate>>;

    /// Record that a named job completed on `day`.
    async fn save_run_token(&self, job: &str, day: NaiveDate) -> Result<()>;

    // === Transaction support ===

    /// Commit pending changes with a message.
    async fn commit(&self, message: &str) -> Result<()>;

    /// Rollback pending changes.
    async fn rollback(&self) -> Result<()>;

    /// Apply a change set and commit it as one unit.
    ///
    /// The default writes each change in order and commits on success. On
    /// the first failure it calls [`Storage::rollback`], which only discards
    /// what the backend can still discard: changes already written stay
    /// written. Backends that must not leave partial state override this;
    /// both bundled backends do.
    async fn apply(&self, changes: &ChangeSet, message: &str) -> Result<()> {
        for change in changes.iter() {
            if let Err(e) = self.write_change(change).await {
                self.rollback().await?;
                return Err(e);
            }
        }
        self.commit(message).await
    }

    /// Write a single change without committing.
    async fn write_change(&self, change: &Change) -> Result<()> {
        match change {
            Change::SaveTask(task) => self.save_task(task).await,
            Change::SaveMilestone(milestone) => self.save_milestone(milestone).await,
            Change::SaveProject(project) => self.save_project(project).await,
            Change::AppendProgressLog(log) => self.append_progress_log(log).await,
            Change::DeleteDependency(id) => self.delete_dependency(*id).await,
            Change::MarkProjectStale(id) => {
                let mut project = self
                    .load_project(*id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(format!("project {}", id)))?;
                project.progress_stale = true;
                self.save_project(&project).await
            }
        }
    }
}
