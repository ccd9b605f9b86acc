//! Milestone model - a checkpoint aggregating a group of tasks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{MilestoneId, ProjectId};

/// A milestone groups tasks and completes when all of them are done and
/// its completion gate passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    /// Unique identifier
    pub id: MilestoneId,

    /// Owning project
    pub project_id: ProjectId,

    /// Milestone name
    pub name: String,

    /// Weighted mean of child task progress
    pub progress_percent: f64,

    /// Milestone status
    pub status: MilestoneStatus,

    /// Target date
    pub plan_date: Option<NaiveDate>,

    /// Date the milestone was completed
    pub actual_date: Option<NaiveDate>,

    /// Items that must be delivered before completion
    #[serde(default)]
    pub deliverables: Vec<Deliverable>,
}

impl Milestone {
    /// Create a pending milestone.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: MilestoneId::new(),
            project_id,
            name: name.into(),
            progress_percent: 0.0,
            status: MilestoneStatus::Pending,
            plan_date: None,
            actual_date: None,
            deliverables: Vec::new(),
        }
    }

    /// Add a deliverable.
    pub fn with_deliverable(mut self, name: impl Into<String>, done: bool) -> Self {
        self.deliverables.push(Deliverable { name: name.into(), done });
        self
    }
}

/// Milestone status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    /// No progress reported yet
    Pending,
    /// Some tasks have progressed
    InProgress,
    /// All tasks done and the completion check passed
    Completed,
}

/// A named item checked by the completion gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Description
    pub name: String,

    /// Whether it has been delivered
    pub done: bool,
}
