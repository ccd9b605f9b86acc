//! In-memory storage backend.
//!
//! Used by tests and by embedders that persist elsewhere. `apply` is
//! all-or-nothing: changes are staged on a copy of the state and swapped in
//! only when every change succeeded.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use planwatch_core::{
    Change, ChangeSet, DependencyId, Milestone, MilestoneId, Notification, NotificationFilter,
    ProgressLog, Project, ProjectId, Task, TaskDependency, TaskId,
};
use tokio::sync::Mutex;

use super::{Result, Storage, StorageError};

#[derive(Debug, Clone, Default)]
struct State {
    projects: BTreeMap<ProjectId, Project>,
    tasks: BTreeMap<TaskId, Task>,
    milestones: HashMap<MilestoneId, Milestone>,
    dependencies: BTreeMap<DependencyId, TaskDependency>,
    logs: HashMap<TaskId, Vec<ProgressLog>>,
    notifications: Vec<Notification>,
    run_tokens: HashMap<String, NaiveDate>,
}

impl State {
    fn write(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::SaveTask(task) => {
                self.tasks.insert(task.id, task.clone());
            }
            Change::SaveMilestone(milestone) => {
                self.milestones.insert(milestone.id, milestone.clone());
            }
            Change::SaveProject(project) => {
                self.projects.insert(project.id, project.clone());
            }
            Change::AppendProgressLog(log) => {
                self.logs.entry(log.task_id).or_default().push(log.clone());
            }
            Change::DeleteDependency(id) => {
                self.dependencies.remove(id);
            }
            Change::MarkProjectStale(id) => {
                let project = self
                    .projects
                    .get_mut(id)
                    .ok_or_else(|| StorageError::NotFound(format!("project {}", id)))?;
                project.progress_stale = true;
            }
        }
        Ok(())
    }
}

/// Storage backend holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_project(&self, project: &Project) -> Result<()> {
        self.state.lock().await.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        Ok(self.state.lock().await.projects.get(&id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.state.lock().await.projects.values().cloned().collect())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.state.lock().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn tasks_by_project(&self, project_id: ProjectId) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn tasks_by_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.milestone_id == Some(milestone_id))
            .cloned()
            .collect())
    }

    async fn save_milestone(&self, milestone: &Milestone) -> Result<()> {
        self.state.lock().await.milestones.insert(milestone.id, milestone.clone());
        Ok(())
    }

    async fn load_milestone(&self, id: MilestoneId) -> Result<Option<Milestone>> {
        Ok(self.state.lock().await.milestones.get(&id).cloned())
    }

    async fn save_dependency(&self, dependency: &TaskDependency) -> Result<()> {
        self.state.lock().await.dependencies.insert(dependency.id, dependency.clone());
        Ok(())
    }

    async fn dependencies_for_tasks(&self, task_ids: &[TaskId]) -> Result<Vec<TaskDependency>> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .values()
            .filter(|d| task_ids.contains(&d.task_id))
            .cloned()
            .collect())
    }

    async fn delete_dependency(&self, id: DependencyId) -> Result<()> {
        self.state.lock().await.dependencies.remove(&id);
        Ok(())
    }

    async fn append_progress_log(&self, log: &ProgressLog) -> Result<()> {
        self.state.lock().await.logs.entry(log.task_id).or_default().push(log.clone());
        Ok(())
    }

    async fn progress_logs(&self, task_id: TaskId) -> Result<Vec<ProgressLog>> {
        let mut logs = self
            .state
            .lock()
            .await
            .logs
            .get(&task_id)
            .cloned()
            .unwrap_or_default();
        logs.sort_by_key(|l| l.updated_at);
        Ok(logs)
    }

    async fn save_notification(&self, notification: &Notification) -> Result<()> {
        self.state.lock().await.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.same_key(filter))
            .cloned()
            .collect())
    }

    async fn load_run_token(&self, job: &str) -> Result<Option<NaiveDate>> {
        Ok(self.state.lock().await.run_tokens.get(job).copied())
    }

    async fn save_run_token(&self, job: &str, day: NaiveDate) -> Result<()> {
        self.state.lock().await.run_tokens.insert(job.to_string(), day);
        Ok(())
    }

    async fn commit(&self, _message: &str) -> Result<()> {
        // Every write is already visible.
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, changes: &ChangeSet, message: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        for change in changes.iter() {
            staged.write(change)?;
        }
        *state = staged;
        tracing::debug!("Applied {} changes: {}", changes.len(), message);
        Ok(())
    }
}
