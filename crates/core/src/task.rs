//! Task model - the unit of scheduled engineering work.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{DependencyId, MilestoneId, ProgressLogId, ProjectId, TaskId, UserId};
use crate::{ModelError, Time};

/// A task belonging to a project, optionally grouped under a milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Owning project
    pub project_id: ProjectId,

    /// Milestone this task rolls up into
    pub milestone_id: Option<MilestoneId>,

    /// Display name
    pub name: String,

    /// Responsible user, if assigned
    pub owner_id: Option<UserId>,

    /// Current status
    pub status: TaskStatus,

    /// Percentage complete (0-100)
    pub progress_percent: f64,

    /// Relative weight in milestone and project rollups
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Planned start date
    pub plan_start: Option<NaiveDate>,

    /// Planned end date
    pub plan_end: Option<NaiveDate>,

    /// Date work actually started
    pub actual_start: Option<NaiveDate>,

    /// Date work actually finished
    pub actual_end: Option<NaiveDate>,

    /// Why the task is blocked (set with `TaskStatus::Blocked`)
    pub block_reason: Option<String>,

    /// Last update timestamp
    pub updated_at: Time,
}

fn default_weight() -> f64 {
    1.0
}

impl Task {
    /// Create a new task in `TODO` with zero progress and weight 1.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            project_id,
            milestone_id: None,
            name: name.into(),
            owner_id: None,
            status: TaskStatus::Todo,
            progress_percent: 0.0,
            weight: default_weight(),
            plan_start: None,
            plan_end: None,
            actual_start: None,
            actual_end: None,
            block_reason: None,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Attach the task to a milestone.
    pub fn with_milestone(mut self, milestone_id: MilestoneId) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }

    /// Set the planned window.
    pub fn with_plan(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.plan_start = Some(start);
        self.plan_end = Some(end);
        self
    }

    /// Set the rollup weight. Negative weights are clamped to zero.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.max(0.0);
        self
    }

    /// Assign an owner.
    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    /// Start date used for scheduling checks: actual if known, else planned.
    pub fn effective_start(&self) -> Option<NaiveDate> {
        self.actual_start.or(self.plan_start)
    }

    /// Finish date used for scheduling checks: actual if known, else planned.
    pub fn effective_finish(&self) -> Option<NaiveDate> {
        self.actual_end.or(self.plan_end)
    }

    /// Whether work on the task has effectively begun.
    pub fn has_started(&self) -> bool {
        matches!(self.status, TaskStatus::InProgress | TaskStatus::Done)
            || self.actual_start.is_some()
    }

    /// Whether the task counts as finished for dependency purposes.
    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Done || self.progress_percent >= 100.0
    }

    /// Done or cancelled: no further scheduling decisions apply.
    pub fn is_closed(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not started
    Todo,
    /// Being worked on
    InProgress,
    /// Stopped by an external condition
    Blocked,
    /// Finished
    Done,
    /// Will not be done
    Cancelled,
}

impl TaskStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of a task a dependency constraint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The task's start date
    Start,
    /// The task's finish date
    Finish,
}

/// Scheduling semantics of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyType {
    /// Successor starts after predecessor finishes
    #[serde(rename = "FS")]
    FinishToStart,
    /// Successor starts after predecessor starts
    #[serde(rename = "SS")]
    StartToStart,
    /// Successor finishes after predecessor finishes
    #[serde(rename = "FF")]
    FinishToFinish,
    /// Successor finishes after predecessor starts
    #[serde(rename = "SF")]
    StartToFinish,
}

impl DependencyType {
    /// Short code (FS, SS, FF, SF).
    pub fn code(&self) -> &'static str {
        match self {
            DependencyType::FinishToStart => "FS",
            DependencyType::StartToStart => "SS",
            DependencyType::FinishToFinish => "FF",
            DependencyType::StartToFinish => "SF",
        }
    }

    /// Human-readable constraint label.
    pub fn label(&self) -> &'static str {
        match self {
            DependencyType::FinishToStart => "finish-to-start",
            DependencyType::StartToStart => "start-to-start",
            DependencyType::FinishToFinish => "finish-to-finish",
            DependencyType::StartToFinish => "start-to-finish",
        }
    }

    /// The predecessor date the constraint is measured from.
    pub fn predecessor_anchor(&self) -> Anchor {
        match self {
            DependencyType::FinishToStart | DependencyType::FinishToFinish => Anchor::Finish,
            DependencyType::StartToStart | DependencyType::StartToFinish => Anchor::Start,
        }
    }

    /// The successor date the constraint applies to.
    pub fn successor_anchor(&self) -> Anchor {
        match self {
            DependencyType::FinishToStart | DependencyType::StartToStart => Anchor::Start,
            DependencyType::FinishToFinish | DependencyType::StartToFinish => Anchor::Finish,
        }
    }
}

impl std::str::FromStr for DependencyType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FS" => Ok(DependencyType::FinishToStart),
            "SS" => Ok(DependencyType::StartToStart),
            "FF" => Ok(DependencyType::FinishToFinish),
            "SF" => Ok(DependencyType::StartToFinish),
            other => Err(ModelError::Invalid(format!("unknown dependency type '{}'", other))),
        }
    }
}

/// A "depends on" edge: `task_id` cannot proceed until `depends_on_task_id`
/// satisfies the constraint given by `dependency_type` and `lag_days`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    /// Unique identifier
    pub id: DependencyId,

    /// Successor
    pub task_id: TaskId,

    /// Predecessor
    pub depends_on_task_id: TaskId,

    /// Constraint semantics
    pub dependency_type: DependencyType,

    /// Offset in days, may be negative
    pub lag_days: i64,
}

impl TaskDependency {
    /// Create a dependency edge, rejecting self-dependencies.
    pub fn new(
        task_id: TaskId,
        depends_on_task_id: TaskId,
        dependency_type: DependencyType,
        lag_days: i64,
    ) -> Result<Self, ModelError> {
        if task_id == depends_on_task_id {
            return Err(ModelError::Invalid(format!(
                "task {} cannot depend on itself",
                task_id
            )));
        }
        Ok(Self {
            id: DependencyId::new(),
            task_id,
            depends_on_task_id,
            dependency_type,
            lag_days,
        })
    }
}

/// Append-only record of a progress change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressLog {
    /// Unique identifier
    pub id: ProgressLogId,

    /// Task the entry belongs to
    pub task_id: TaskId,

    /// Progress after the change
    pub progress_percent: f64,

    /// Free-form note
    pub note: String,

    /// Who made the change
    pub updated_by: UserId,

    /// When the change was recorded
    pub updated_at: Time,
}

impl ProgressLog {
    /// Create a new log entry.
    pub fn new(
        task_id: TaskId,
        progress_percent: f64,
        note: impl Into<String>,
        updated_by: UserId,
        updated_at: Time,
    ) -> Self {
        Self {
            id: ProgressLogId::new(),
            task_id,
            progress_percent,
            note: note.into(),
            updated_by,
            updated_at,
        }
    }
}
