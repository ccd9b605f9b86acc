//! PlanWatch core data models.
//!
//! Tasks, their dependency edges and progress history, the milestones and
//! projects they roll up into, and the change commands services emit.

#![warn(missing_docs)]

// Core identities
mod id;

// Planning entities
mod project;
mod milestone;
mod task;

// Alerts and writes
mod notification;
mod change;

// Time
mod clock;

pub use id::*;

pub use project::{Project, ProjectStatus, Actor};
pub use milestone::{Milestone, MilestoneStatus, Deliverable};
pub use task::{
    Task, TaskStatus, TaskDependency, DependencyType, Anchor, ProgressLog,
};
pub use notification::{Notification, NotificationFilter, Priority};
pub use change::{Change, ChangeSet};
pub use clock::{Clock, SystemClock, FixedClock};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Errors raised when constructing model values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// A value violates a model invariant
    #[error("invalid value: {0}")]
    Invalid(String),
}
