//! Progress aggregation service.
//!
//! Applies a task's progress change, derives the milestone cascade and
//! returns every write as a [`ChangeSet`]. Project progress is only flagged
//! stale here; [`ProgressAggregator::refresh_project_progress`] is the
//! scheduled rollup that recomputes it.

use std::sync::Arc;

use chrono::NaiveDate;
use planwatch_core::{
    Actor, Change, ChangeSet, Clock, Milestone, MilestoneStatus, ProgressLog, Project, ProjectId,
    SystemClock, Task, TaskId, TaskStatus, Time,
};
use planwatch_storage::Storage;
use tracing::{debug, info, warn};

use crate::error::{ProgressError, Result};
use crate::gate::{CompletionGate, DeliverableGate, GateFailurePolicy, GateOutcome};

/// What happened to the task's milestone during a cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum MilestoneOutcome {
    /// The task has no milestone
    NoMilestone,
    /// Progress recomputed, no completion attempted
    Recomputed {
        /// New milestone progress
        progress: f64,
    },
    /// The milestone was completed
    Completed,
    /// The gate refused completion
    CompletionBlocked(Vec<String>),
    /// The gate could not be checked; `completed` reflects the policy
    GateCheckFailed {
        /// Why the check failed
        reason: String,
        /// Whether the milestone was completed anyway
        completed: bool,
    },
}

/// A planned progress update, not yet written.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// The task after the update
    pub task: Task,
    /// The milestone after the cascade, if the task has one
    pub milestone: Option<Milestone>,
    /// What the cascade decided
    pub milestone_outcome: MilestoneOutcome,
    /// Writes to apply in one commit
    pub changes: ChangeSet,
}

/// Apply the task state machine for a new progress value.
///
/// TODO → IN_PROGRESS on the first positive value (stamping `actual_start`),
/// DONE at 100 (stamping `actual_end` once). Blocked tasks resume when
/// progress is reported; a done task that regresses reopens.
pub fn apply_transition(task: &mut Task, new_percent: f64, today: NaiveDate) {
    if new_percent >= 100.0 {
        task.progress_percent = 100.0;
        task.status = TaskStatus::Done;
        task.actual_start.get_or_insert(today);
        task.actual_end.get_or_insert(today);
        task.block_reason = None;
        return;
    }

    task.progress_percent = new_percent;
    if task.status == TaskStatus::Done {
        task.status = TaskStatus::InProgress;
        task.actual_end = None;
    }
    if new_percent > 0.0 {
        if matches!(task.status, TaskStatus::Todo | TaskStatus::Blocked) {
            task.status = TaskStatus::InProgress;
            task.block_reason = None;
        }
        task.actual_start.get_or_insert(today);
    }
}

/// Weighted mean progress of non-cancelled tasks. Falls back to a plain
/// mean when every weight is zero.
pub fn weighted_progress<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> f64 {
    let active: Vec<&Task> = tasks
        .into_iter()
        .filter(|t| t.status != TaskStatus::Cancelled)
        .collect();
    weighted_mean(&active, |t| t.weight, |t| t.progress_percent)
}

/// Weighted mean of `value` over `items`, treating all weights as equal
/// when they sum to zero. Empty input gives 0.
pub(crate) fn weighted_mean<T>(
    items: &[T],
    weight: impl Fn(&T) -> f64,
    value: impl Fn(&T) -> f64,
) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = items.iter().map(&weight).sum();
    if total_weight > 0.0 {
        items.iter().map(|i| weight(i) * value(i)).sum::<f64>() / total_weight
    } else {
        items.iter().map(&value).sum::<f64>() / items.len() as f64
    }
}

/// Progress aggregation service.
#[derive(Clone)]
pub struct ProgressAggregator {
    storage: Arc<dyn Storage>,
    gate: Arc<dyn CompletionGate>,
    gate_failure_policy: GateFailurePolicy,
    clock: Arc<dyn Clock>,
}

impl ProgressAggregator {
    /// Create an aggregator using the deliverable gate and the system clock.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            gate: Arc::new(DeliverableGate),
            gate_failure_policy: GateFailurePolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the completion gate.
    pub fn with_gate(mut self, gate: Arc<dyn CompletionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Set what happens when the gate check fails.
    pub fn with_gate_failure_policy(mut self, policy: GateFailurePolicy) -> Self {
        self.gate_failure_policy = policy;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Task> {
        self.storage
            .load_task(task_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("task {}", task_id)))
    }

    async fn load_project(&self, project_id: ProjectId) -> Result<Project> {
        self.storage
            .load_project(project_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("project {}", project_id)))
    }

    /// Validate and plan a progress update without writing anything.
    pub async fn plan_progress_update(
        &self,
        task_id: TaskId,
        new_percent: f64,
        actor: &Actor,
        note: Option<&str>,
    ) -> Result<ProgressUpdate> {
        if !new_percent.is_finite() || !(0.0..=100.0).contains(&new_percent) {
            return Err(ProgressError::Validation(format!(
                "progress must be between 0 and 100, got {}",
                new_percent
            )));
        }

        let mut task = self.load_task(task_id).await?;
        if task.status == TaskStatus::Cancelled {
            return Err(ProgressError::Validation(format!(
                "task '{}' is cancelled",
                task.name
            )));
        }

        let old_percent = task.progress_percent;
        if new_percent < old_percent {
            let project = self.load_project(task.project_id).await?;
            if !project.is_privileged(actor) {
                return Err(ProgressError::Authorization(
                    "progress regression requires approval".to_string(),
                ));
            }
        }

        let now = self.clock.now();
        apply_transition(&mut task, new_percent, now.date_naive());
        task.updated_at = now;

        let mut message = format!("{:.0}% -> {:.0}%", old_percent, task.progress_percent);
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            message.push_str(": ");
            message.push_str(note.trim());
        }

        let mut changes = ChangeSet::new();
        changes.push(Change::SaveTask(task.clone()));
        changes.push(Change::AppendProgressLog(ProgressLog::new(
            task.id,
            task.progress_percent,
            message,
            actor.user_id.clone(),
            now,
        )));

        let (milestone, milestone_outcome) = self.cascade(&task, now).await?;
        if let Some(m) = &milestone {
            changes.push(Change::SaveMilestone(m.clone()));
        }
        changes.push(Change::MarkProjectStale(task.project_id));

        Ok(ProgressUpdate { task, milestone, milestone_outcome, changes })
    }

    /// Update a task's progress and commit the cascade.
    pub async fn update_task_progress(
        &self,
        task_id: TaskId,
        new_percent: f64,
        actor: &Actor,
        note: Option<&str>,
    ) -> Result<Task> {
        let update = self.plan_progress_update(task_id, new_percent, actor, note).await?;
        self.storage
            .apply(&update.changes, &format!("Update progress of task {}", task_id))
            .await?;

        info!(
            "Task {} progress {:.0}% ({}) by {}",
            update.task.id, update.task.progress_percent, update.task.status, actor.user_id
        );
        Ok(update.task)
    }

    /// Recompute the task's milestone given the task's new state.
    async fn cascade(&self, task: &Task, now: Time) -> Result<(Option<Milestone>, MilestoneOutcome)> {
        let Some(milestone_id) = task.milestone_id else {
            return Ok((None, MilestoneOutcome::NoMilestone));
        };
        let Some(mut milestone) = self.storage.load_milestone(milestone_id).await? else {
            warn!("Task {} references missing milestone {}", task.id, milestone_id);
            return Ok((None, MilestoneOutcome::NoMilestone));
        };

        let mut siblings = self.storage.tasks_by_milestone(milestone_id).await?;
        match siblings.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task.clone(),
            None => siblings.push(task.clone()),
        }

        milestone.progress_percent = weighted_progress(&siblings);

        let active: Vec<&Task> = siblings
            .iter()
            .filter(|t| t.status != TaskStatus::Cancelled)
            .collect();
        let all_done = !active.is_empty() && active.iter().all(|t| t.status == TaskStatus::Done);

        if !all_done || milestone.status == MilestoneStatus::Completed {
            if milestone.status == MilestoneStatus::Pending && milestone.progress_percent > 0.0 {
                milestone.status = MilestoneStatus::InProgress;
            }
            let progress = milestone.progress_percent;
            return Ok((Some(milestone), MilestoneOutcome::Recomputed { progress }));
        }

        let outcome = match self.gate.check_milestone_completion(&milestone).await {
            GateOutcome::Passed => {
                complete(&mut milestone, now.date_naive());
                MilestoneOutcome::Completed
            }
            GateOutcome::Blocked(missing) => {
                info!(
                    "Milestone '{}' not completed, missing: {}",
                    milestone.name,
                    missing.join(", ")
                );
                MilestoneOutcome::CompletionBlocked(missing)
            }
            GateOutcome::CheckFailed(reason) => {
                let completed = self.gate_failure_policy.allows_completion();
                warn!(
                    "Completion gate failed for milestone '{}': {} (policy {:?}, completed: {})",
                    milestone.name, reason, self.gate_failure_policy, completed
                );
                if completed {
                    complete(&mut milestone, now.date_naive());
                }
                MilestoneOutcome::GateCheckFailed { reason, completed }
            }
        };

        Ok((Some(milestone), outcome))
    }

    /// Put a task into BLOCKED with a reason.
    pub async fn set_task_blocked(&self, task_id: TaskId, reason: &str, actor: &Actor) -> Result<Task> {
        let mut task = self.load_task(task_id).await?;
        if task.is_closed() {
            return Err(ProgressError::Validation(format!(
                "task '{}' is {} and cannot be blocked",
                task.name, task.status
            )));
        }

        let now = self.clock.now();
        task.status = TaskStatus::Blocked;
        task.block_reason = Some(reason.to_string());
        task.updated_at = now;

        let mut changes = ChangeSet::new();
        changes.push(Change::SaveTask(task.clone()));
        changes.push(Change::AppendProgressLog(ProgressLog::new(
            task.id,
            task.progress_percent,
            format!("blocked: {}", reason),
            actor.user_id.clone(),
            now,
        )));
        self.storage.apply(&changes, &format!("Block task {}", task_id)).await?;
        Ok(task)
    }

    /// Cancel a task. Cancelled tasks leave milestone rollups, so the
    /// milestone is recomputed and may complete.
    pub async fn cancel_task(&self, task_id: TaskId, actor: &Actor) -> Result<Task> {
        let mut task = self.load_task(task_id).await?;
        if task.status == TaskStatus::Done {
            return Err(ProgressError::Validation(format!(
                "task '{}' is already done",
                task.name
            )));
        }

        let now = self.clock.now();
        task.status = TaskStatus::Cancelled;
        task.updated_at = now;

        let mut changes = ChangeSet::new();
        changes.push(Change::SaveTask(task.clone()));
        changes.push(Change::AppendProgressLog(ProgressLog::new(
            task.id,
            task.progress_percent,
            "cancelled",
            actor.user_id.clone(),
            now,
        )));
        let (milestone, _) = self.cascade(&task, now).await?;
        if let Some(m) = milestone {
            changes.push(Change::SaveMilestone(m));
        }
        changes.push(Change::MarkProjectStale(task.project_id));

        self.storage.apply(&changes, &format!("Cancel task {}", task_id)).await?;
        Ok(task)
    }

    /// Scheduled rollup: recompute project progress from its tasks.
    pub async fn refresh_project_progress(&self, project_id: ProjectId) -> Result<Project> {
        let mut project = self.load_project(project_id).await?;
        let tasks = self.storage.tasks_by_project(project_id).await?;

        project.progress_percent = weighted_progress(&tasks);
        project.progress_stale = false;
        project.progress_refreshed_at = Some(self.clock.now());
        self.storage.save_project(&project).await?;
        self.storage
            .commit(&format!("Refresh progress of project {}", project_id))
            .await?;

        debug!("Project {} progress {:.1}%", project.name, project.progress_percent);
        Ok(project)
    }
}

fn complete(milestone: &mut Milestone, today: NaiveDate) {
    milestone.status = MilestoneStatus::Completed;
    milestone.actual_date.get_or_insert(today);
}
