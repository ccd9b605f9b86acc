//! Unique identifiers for PlanWatch entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier.
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a Task
    TaskId
);
ulid_id!(
    /// Unique identifier for a TaskDependency edge
    DependencyId
);
ulid_id!(
    /// Unique identifier for a ProgressLog entry
    ProgressLogId
);
ulid_id!(
    /// Unique identifier for a Milestone
    MilestoneId
);
ulid_id!(
    /// Unique identifier for a Project
    ProjectId
);
ulid_id!(
    /// Unique identifier for a persisted Notification
    NotificationId
);

/// Identifier for a user (PM, task owner, admin or the system itself).
///
/// Users live in the external auth layer, so this is an opaque string
/// rather than a generated ULID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The system actor used by scheduled jobs.
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
