//! Project model - the top-level container for tasks and milestones.

use serde::{Deserialize, Serialize};

use crate::id::{ProjectId, UserId};
use crate::Time;

/// A project owns tasks and milestones and has one project manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier
    pub id: ProjectId,

    /// Project name
    pub name: String,

    /// Lifecycle status
    pub status: ProjectStatus,

    /// Project manager
    pub manager_id: UserId,

    /// Weighted progress, refreshed by the scheduled rollup
    pub progress_percent: f64,

    /// Set when task progress changed since the last rollup
    #[serde(default)]
    pub progress_stale: bool,

    /// When the rollup last ran
    pub progress_refreshed_at: Option<Time>,

    /// When created
    pub created_at: Time,
}

impl Project {
    /// Create a new project in planning.
    pub fn new(name: impl Into<String>, manager_id: UserId) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            status: ProjectStatus::Planning,
            manager_id,
            progress_percent: 0.0,
            progress_stale: false,
            progress_refreshed_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Whether `actor` may perform privileged changes such as progress
    /// regression on this project's tasks.
    pub fn is_privileged(&self, actor: &Actor) -> bool {
        actor.is_admin || actor.user_id == self.manager_id
    }
}

/// Project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    /// Being scoped
    Planning,
    /// Work under way
    InProgress,
    /// Paused
    OnHold,
    /// Finished
    Completed,
    /// Abandoned
    Cancelled,
}

impl ProjectStatus {
    /// Statuses swept by the daily auto-processing job.
    pub fn is_execution_relevant(&self) -> bool {
        matches!(self, ProjectStatus::Planning | ProjectStatus::InProgress)
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Who is acting
    pub user_id: UserId,

    /// Global administrator flag
    pub is_admin: bool,
}

impl Actor {
    /// A regular user.
    pub fn user(user_id: UserId) -> Self {
        Self { user_id, is_admin: false }
    }

    /// An administrator.
    pub fn admin(user_id: UserId) -> Self {
        Self { user_id, is_admin: true }
    }

    /// The scheduler acting on its own behalf.
    pub fn system() -> Self {
        Self::admin(UserId::system())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_actors() {
        let pm = UserId::new("pm");
        let project = Project::new("bridge", pm.clone());

        assert!(project.is_privileged(&Actor::user(pm)));
        assert!(project.is_privileged(&Actor::admin(UserId::new("root"))));
        assert!(!project.is_privileged(&Actor::user(UserId::new("dev"))));
    }

    #[test]
    fn test_execution_relevant_statuses() {
        assert!(ProjectStatus::InProgress.is_execution_relevant());
        assert!(ProjectStatus::Planning.is_execution_relevant());
        assert!(!ProjectStatus::Completed.is_execution_relevant());
        assert!(!ProjectStatus::OnHold.is_execution_relevant());
    }
}
