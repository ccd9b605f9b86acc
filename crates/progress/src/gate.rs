//! Milestone completion gates.
//!
//! A gate decides whether a milestone whose tasks are all done may be marked
//! completed. Its answer is an explicit [`GateOutcome`]; when the check
//! itself fails, the caller's [`GateFailurePolicy`] decides what happens.

use async_trait::async_trait;
use planwatch_core::Milestone;
use serde::{Deserialize, Serialize};

/// Result of a completion check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The milestone may complete
    Passed,
    /// The milestone must wait for these items
    Blocked(Vec<String>),
    /// The check could not be performed
    CheckFailed(String),
}

/// What to do when a gate reports [`GateOutcome::CheckFailed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailurePolicy {
    /// Complete the milestone anyway
    FailOpen,
    /// Leave the milestone open until a check succeeds
    #[default]
    FailClosed,
}

impl GateFailurePolicy {
    /// Whether a failed check still allows completion.
    pub fn allows_completion(&self) -> bool {
        matches!(self, GateFailurePolicy::FailOpen)
    }
}

/// Checks whether a milestone may be completed.
#[async_trait]
pub trait CompletionGate: Send + Sync {
    /// Check completion preconditions for `milestone`.
    async fn check_milestone_completion(&self, milestone: &Milestone) -> GateOutcome;
}

/// Gate that requires every milestone deliverable to be done.
#[derive(Debug, Clone, Default)]
pub struct DeliverableGate;

#[async_trait]
impl CompletionGate for DeliverableGate {
    async fn check_milestone_completion(&self, milestone: &Milestone) -> GateOutcome {
        let missing: Vec<String> = milestone
            .deliverables
            .iter()
            .filter(|d| !d.done)
            .map(|d| d.name.clone())
            .collect();

        if missing.is_empty() {
            GateOutcome::Passed
        } else {
            GateOutcome::Blocked(missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwatch_core::ProjectId;

    #[tokio::test]
    async fn test_deliverable_gate() {
        let gate = DeliverableGate;
        let milestone = Milestone::new(ProjectId::new(), "M1")
            .with_deliverable("design review", true)
            .with_deliverable("sign-off", false);

        assert_eq!(
            gate.check_milestone_completion(&milestone).await,
            GateOutcome::Blocked(vec!["sign-off".to_string()])
        );

        let done = Milestone::new(ProjectId::new(), "M2").with_deliverable("design review", true);
        assert_eq!(gate.check_milestone_completion(&done).await, GateOutcome::Passed);
    }

    #[test]
    fn test_default_policy_is_fail_closed() {
        assert_eq!(GateFailurePolicy::default(), GateFailurePolicy::FailClosed);
        assert!(!GateFailurePolicy::FailClosed.allows_completion());
        assert!(GateFailurePolicy::FailOpen.allows_completion());
    }
}
