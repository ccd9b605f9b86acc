//! Notification records - alerts dispatched to users and kept for debounce.

use serde::{Deserialize, Serialize};

use crate::id::{NotificationId, UserId};
use crate::Time;

/// An alert sent to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier
    pub id: NotificationId,

    /// Recipient
    pub user_id: UserId,

    /// Alert type
    pub kind: String,

    /// Title line
    pub title: String,

    /// Body text
    pub body: String,

    /// Kind of entity the alert is about (e.g. "project")
    pub source_type: String,

    /// Identifier of that entity
    pub source_id: String,

    /// Delivery priority
    pub priority: Priority,

    /// Structured payload for richer clients
    #[serde(default)]
    pub extra: serde_json::Value,

    /// When it was sent
    pub sent_at: Time,
}

impl Notification {
    /// Whether two alerts share the de-duplication key (ignoring time).
    pub fn same_key(&self, filter: &NotificationFilter) -> bool {
        filter.user_id.as_ref().map_or(true, |u| *u == self.user_id)
            && filter.kind.as_ref().map_or(true, |k| *k == self.kind)
            && filter.source_type.as_ref().map_or(true, |t| *t == self.source_type)
            && filter.source_id.as_ref().map_or(true, |s| *s == self.source_id)
            && filter.since.map_or(true, |since| self.sent_at >= since)
    }
}

/// Alert priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Digest material
    Low,
    /// Default
    Normal,
    /// Structural or schedule risk
    High,
    /// Dependency cycles
    Urgent,
}

impl Priority {
    /// Wire name of the priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }
}

/// Filter for querying sent notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationFilter {
    /// Recipient
    pub user_id: Option<UserId>,

    /// Alert type
    pub kind: Option<String>,

    /// Source entity type
    pub source_type: Option<String>,

    /// Source entity id
    pub source_id: Option<String>,

    /// Only alerts sent at or after this instant
    pub since: Option<Time>,
}
