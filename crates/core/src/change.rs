//! Derived update commands.
//!
//! Services never mutate related records behind the caller's back. They
//! describe every write as a [`Change`] and hand the resulting [`ChangeSet`]
//! to storage, which applies it in a single commit.

use serde::{Deserialize, Serialize};

use crate::id::{DependencyId, ProjectId};
use crate::{Milestone, ProgressLog, Project, Task};

/// A single write against storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Change {
    /// Create or replace a task
    SaveTask(Task),
    /// Create or replace a milestone
    SaveMilestone(Milestone),
    /// Create or replace a project
    SaveProject(Project),
    /// Append a progress log entry
    AppendProgressLog(ProgressLog),
    /// Remove a dependency edge
    DeleteDependency(DependencyId),
    /// Flag a project for the next scheduled progress rollup
    MarkProjectStale(ProjectId),
}

/// Ordered list of changes applied atomically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change.
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Whether there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterate changes in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskStatus;

    #[test]
    fn test_changes_keep_order() {
        let project = ProjectId::new();
        let mut task = Task::new(project, "a");
        let mut set = ChangeSet::new();
        assert!(set.is_empty());

        set.push(Change::SaveTask(task.clone()));
        task.status = TaskStatus::Blocked;
        set.push(Change::MarkProjectStale(project));
        set.push(Change::SaveTask(task.clone()));

        assert_eq!(set.len(), 3);
        let statuses: Vec<_> = set
            .iter()
            .filter_map(|c| match c {
                Change::SaveTask(t) => Some(t.status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![TaskStatus::Todo, TaskStatus::Blocked]);
    }
}
