//! JSON file storage implementation.
//!
//! Stores each record as a JSON file under a root directory and keeps small
//! per-object meta markers (version + updated_at). Progress logs and sent
//! notifications are append-only, so their files are never rewritten.
//!
//! Every file is first written under `staging/` and then renamed into place,
//! so readers never see a half-written record. A record that does not parse
//! is an error, never skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use planwatch_core::{
    Change, ChangeSet, DependencyId, Milestone, MilestoneId, Notification, NotificationFilter,
    ProgressLog, Project, ProjectId, Task, TaskDependency, TaskId,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use super::{Result, Storage, StorageError};

const KINDS: &[&str] = &[
    "projects",
    "tasks",
    "milestones",
    "dependencies",
    "progress_logs",
    "notifications",
    "run_tokens",
];

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    pending: Arc<Mutex<bool>>,
    staged_seq: AtomicU64,
}

/// A file written to `staging/`, waiting to be renamed over its record.
struct StagedFile {
    staged: PathBuf,
    target: PathBuf,
    /// Kind and id for meta bumps; `None` for append-only records
    versioned: Option<(&'static str, String)>,
}

enum StagedChange {
    Write(StagedFile),
    Remove(PathBuf),
}

#[derive(Debug, Serialize, Deserialize)]
struct RunToken {
    job: String,
    day: NaiveDate,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the record and meta
    /// directories if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for kind in KINDS {
            fs::create_dir_all(root.join(kind)).await?;
            fs::create_dir_all(root.join("meta").join(kind)).await?;
        }
        fs::create_dir_all(root.join("staging")).await?;

        Ok(Self {
            root,
            pending: Arc::new(Mutex::new(false)),
            staged_seq: AtomicU64::new(0),
        })
    }

    fn record_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join(kind).join(format!("{}.json", id))
    }

    fn meta_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("meta").join(kind).join(format!("{}.meta.json", id))
    }

    async fn set_pending(&self) {
        *self.pending.lock().await = true;
    }

    /// Whether writes happened since the last commit or rollback.
    pub async fn is_pending(&self) -> bool {
        *self.pending.lock().await
    }

    /// Write `bytes` to a fresh file under `staging/`.
    async fn stage_bytes(&self, id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let seq = self.staged_seq.fetch_add(1, Ordering::Relaxed);
        let path = self
            .root
            .join("staging")
            .join(format!("{}-{}-{}.json", std::process::id(), seq, id));
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Replace `target` with `bytes` in one rename.
    async fn write_atomic(&self, target: PathBuf, id: &str, bytes: &[u8]) -> Result<()> {
        let staged = self.stage_bytes(id, bytes).await?;
        if let Err(e) = fs::rename(&staged, &target).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let path = self.meta_path(kind, id);
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        self.write_atomic(path, id, serde_json::to_string_pretty(&meta)?.as_bytes())
            .await?;
        Ok(version)
    }

    async fn write_record<T: Serialize>(&self, kind: &str, id: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        self.write_atomic(self.record_path(kind, id), id, json.as_bytes()).await?;
        self.bump_version(kind, id).await?;
        self.set_pending().await;
        Ok(())
    }

    async fn stage_record<T: Serialize>(
        &self,
        kind: &'static str,
        id: String,
        value: &T,
        versioned: bool,
    ) -> Result<StagedFile> {
        let json = serde_json::to_string_pretty(value)?;
        let staged = self.stage_bytes(&id, json.as_bytes()).await?;
        Ok(StagedFile {
            staged,
            target: self.record_path(kind, &id),
            versioned: versioned.then_some((kind, id)),
        })
    }

    /// Serialize every change into `staging/` without touching stored
    /// records. Stale markers see projects saved earlier in the same set.
    async fn stage_changes(&self, changes: &ChangeSet, out: &mut Vec<StagedChange>) -> Result<()> {
        let mut projects: HashMap<ProjectId, Project> = HashMap::new();
        for change in changes.iter() {
            let staged = match change {
                Change::SaveTask(task) => {
                    self.stage_record("tasks", task.id.to_string(), task, true).await?
                }
                Change::SaveMilestone(milestone) => {
                    self.stage_record("milestones", milestone.id.to_string(), milestone, true)
                        .await?
                }
                Change::SaveProject(project) => {
                    projects.insert(project.id, project.clone());
                    self.stage_record("projects", project.id.to_string(), project, true).await?
                }
                Change::AppendProgressLog(log) => {
                    self.stage_record("progress_logs", log.id.to_string(), log, false).await?
                }
                Change::DeleteDependency(id) => {
                    out.push(StagedChange::Remove(self.record_path("dependencies", &id.to_string())));
                    continue;
                }
                Change::MarkProjectStale(id) => {
                    let mut project = match projects.remove(id) {
                        Some(project) => project,
                        None => self
                            .load_project(*id)
                            .await?
                            .ok_or_else(|| StorageError::NotFound(format!("project {}", id)))?,
                    };
                    project.progress_stale = true;
                    let staged = self
                        .stage_record("projects", id.to_string(), &project, true)
                        .await?;
                    projects.insert(*id, project);
                    staged
                }
            };
            out.push(StagedChange::Write(staged));
        }
        Ok(())
    }

    async fn discard_staged(staged: &[StagedChange]) {
        for change in staged {
            if let StagedChange::Write(file) = change {
                let _ = fs::remove_file(&file.staged).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn save_project(&self, project: &Project) -> Result<()> {
        self.write_record("projects", &project.id.to_string(), project).await
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        read_json(&self.record_path("projects", &id.to_string())).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = list_dir(&self.root.join("projects")).await?;
        projects.sort_by_key(|p| p.id);
        Ok(projects)
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.write_record("tasks", &task.id.to_string(), task).await
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        read_json(&self.record_path("tasks", &id.to_string())).await
    }

    async fn tasks_by_project(&self, project_id: ProjectId) -> Result<Vec<Task>> {
        let all: Vec<Task> = list_dir(&self.root.join("tasks")).await?;
        let mut tasks: Vec<Task> = all.into_iter().filter(|t| t.project_id == project_id).collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn tasks_by_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<Task>> {
        let all: Vec<Task> = list_dir(&self.root.join("tasks")).await?;
        Ok(all
            .into_iter()
            .filter(|t| t.milestone_id == Some(milestone_id))
            .collect())
    }

    async fn save_milestone(&self, milestone: &Milestone) -> Result<()> {
        self.write_record("milestones", &milestone.id.to_string(), milestone).await
    }

    async fn load_milestone(&self, id: MilestoneId) -> Result<Option<Milestone>> {
        read_json(&self.record_path("milestones", &id.to_string())).await
    }

    async fn save_dependency(&self, dependency: &TaskDependency) -> Result<()> {
        self.write_record("dependencies", &dependency.id.to_string(), dependency).await
    }

    async fn dependencies_for_tasks(&self, task_ids: &[TaskId]) -> Result<Vec<TaskDependency>> {
        let all: Vec<TaskDependency> = list_dir(&self.root.join("dependencies")).await?;
        let mut deps: Vec<TaskDependency> = all
            .into_iter()
            .filter(|d| task_ids.contains(&d.task_id))
            .collect();
        deps.sort_by_key(|d| d.id);
        Ok(deps)
    }

    async fn delete_dependency(&self, id: DependencyId) -> Result<()> {
        fs::remove_file(self.record_path("dependencies", &id.to_string()))
            .await
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
            })?;
        self.set_pending().await;
        Ok(())
    }

    async fn append_progress_log(&self, log: &ProgressLog) -> Result<()> {
        let id = log.id.to_string();
        let json = serde_json::to_string_pretty(log)?;
        self.write_atomic(self.record_path("progress_logs", &id), &id, json.as_bytes())
            .await?;
        self.set_pending().await;
        Ok(())
    }

    async fn progress_logs(&self, task_id: TaskId) -> Result<Vec<ProgressLog>> {
        let all: Vec<ProgressLog> = list_dir(&self.root.join("progress_logs")).await?;
        let mut logs: Vec<ProgressLog> = all.into_iter().filter(|l| l.task_id == task_id).collect();
        logs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(logs)
    }

    async fn save_notification(&self, notification: &Notification) -> Result<()> {
        let id = notification.id.to_string();
        let json = serde_json::to_string_pretty(notification)?;
        self.write_atomic(self.record_path("notifications", &id), &id, json.as_bytes())
            .await?;
        self.set_pending().await;
        Ok(())
    }

    async fn list_notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>> {
        let all: Vec<Notification> = list_dir(&self.root.join("notifications")).await?;
        let mut matching: Vec<Notification> = all.into_iter().filter(|n| n.same_key(filter)).collect();
        matching.sort_by_key(|n| n.sent_at);
        Ok(matching)
    }

    async fn load_run_token(&self, job: &str) -> Result<Option<NaiveDate>> {
        let token: Option<RunToken> = read_json(&self.record_path("run_tokens", job)).await?;
        Ok(token.map(|t| t.day))
    }

    async fn save_run_token(&self, job: &str, day: NaiveDate) -> Result<()> {
        let token = RunToken { job: job.to_string(), day };
        self.write_record("run_tokens", job, &token).await
    }

    async fn commit(&self, message: &str) -> Result<()> {
        // No versioning backend; commit only clears pending state.
        tracing::debug!("Commit: {}", message);
        *self.pending.lock().await = false;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        *self.pending.lock().await = false;
        Ok(())
    }

    /// Stage every change first; stored records are only replaced once the
    /// whole set has been written to `staging/`.
    async fn apply(&self, changes: &ChangeSet, message: &str) -> Result<()> {
        let mut staged = Vec::with_capacity(changes.len());
        if let Err(e) = self.stage_changes(changes, &mut staged).await {
            Self::discard_staged(&staged).await;
            return Err(e);
        }

        for (i, change) in staged.iter().enumerate() {
            let moved = match change {
                StagedChange::Write(file) => fs::rename(&file.staged, &file.target).await,
                StagedChange::Remove(path) => match fs::remove_file(path).await {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(e) = moved {
                tracing::warn!(
                    "Apply '{}' stopped after {} of {} changes: {}",
                    message,
                    i,
                    staged.len(),
                    e
                );
                Self::discard_staged(&staged[i..]).await;
                self.set_pending().await;
                return Err(e.into());
            }
        }

        for change in &staged {
            if let StagedChange::Write(StagedFile { versioned: Some((kind, id)), .. }) = change {
                self.bump_version(kind, id).await?;
            }
        }
        self.set_pending().await;
        self.commit(message).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Unreadable record {}: {}", entry.path().display(), e);
                return Err(e);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwatch_core::{Change, ChangeSet, DependencyType, TaskStatus, UserId};

    #[tokio::test]
    async fn test_task_roundtrip_and_project_filter() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let project = Project::new("Bridge", UserId::new("pm"));
        storage.save_project(&project).await.unwrap();

        let mut task = Task::new(project.id, "Pour foundation");
        task.status = TaskStatus::InProgress;
        storage.save_task(&task).await.unwrap();
        storage.save_task(&Task::new(ProjectId::new(), "elsewhere")).await.unwrap();

        let loaded = storage.load_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Pour foundation");
        assert_eq!(loaded.status, TaskStatus::InProgress);
        assert_eq!(storage.tasks_by_project(project.id).await.unwrap().len(), 1);
        assert!(storage.is_pending().await);
    }

    #[tokio::test]
    async fn test_apply_marks_project_stale_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let project = Project::new("Bridge", UserId::new("pm"));
        storage.save_project(&project).await.unwrap();

        let a = Task::new(project.id, "a");
        let b = Task::new(project.id, "b");
        let dep = TaskDependency::new(b.id, a.id, DependencyType::FinishToStart, 1).unwrap();
        storage.save_dependency(&dep).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.push(Change::SaveTask(a.clone()));
        changes.push(Change::DeleteDependency(dep.id));
        changes.push(Change::MarkProjectStale(project.id));
        storage.apply(&changes, "test").await.unwrap();

        assert!(!storage.is_pending().await);
        assert!(storage.load_task(a.id).await.unwrap().is_some());
        assert!(storage.dependencies_for_tasks(&[b.id]).await.unwrap().is_empty());
        assert!(storage.load_project(project.id).await.unwrap().unwrap().progress_stale);
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_records_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let unsaved = Project::new("Ghost", UserId::new("pm"));
        let task = Task::new(unsaved.id, "a");

        let mut changes = ChangeSet::new();
        changes.push(Change::SaveTask(task.clone()));
        changes.push(Change::MarkProjectStale(unsaved.id));
        let result = storage.apply(&changes, "test").await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(storage.load_task(task.id).await.unwrap().is_none());
        assert!(!storage.is_pending().await);
        let mut staging = fs::read_dir(dir.path().join("staging")).await.unwrap();
        assert!(staging.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_marker_sees_project_saved_in_same_set() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let mut project = Project::new("Bridge", UserId::new("pm"));
        project.progress_percent = 30.0;

        let mut changes = ChangeSet::new();
        changes.push(Change::SaveProject(project.clone()));
        changes.push(Change::MarkProjectStale(project.id));
        storage.apply(&changes, "test").await.unwrap();

        let loaded = storage.load_project(project.id).await.unwrap().unwrap();
        assert!(loaded.progress_stale);
        assert_eq!(loaded.progress_percent, 30.0);
    }

    #[tokio::test]
    async fn test_unreadable_record_fails_listing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let project = Project::new("Bridge", UserId::new("pm"));
        let a = Task::new(project.id, "a");
        let b = Task::new(project.id, "b");
        storage.save_task(&a).await.unwrap();
        storage.save_task(&b).await.unwrap();

        // Torn write from another process.
        fs::write(storage.record_path("tasks", &a.id.to_string()), b"{\"id\":")
            .await
            .unwrap();

        assert!(matches!(
            storage.tasks_by_project(project.id).await,
            Err(StorageError::Json(_))
        ));
        assert!(matches!(storage.load_task(a.id).await, Err(StorageError::Json(_))));
        assert!(storage.load_task(b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_token_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        {
            let storage = JsonStorage::new(dir.path()).await.unwrap();
            storage.save_run_token("auto_processing", day).await.unwrap();
        }
        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        assert_eq!(reopened.load_run_token("auto_processing").await.unwrap(), Some(day));
    }
}
