//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task state.
///
/// State transitions:
/// - Pending -> Active -> (ack: removed)
/// - Scheduled -> Pending (process_at elapsed)
/// - Active -> Retry -> Pending (backoff elapsed, loop until max_retry)
/// - Active -> Archived (retry budget exhausted, or permanent failure)
/// - Active -> Pending (lease expired without ack/retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Ready to be claimed.
    Pending,

    /// Waiting for its first `process_at`.
    Scheduled,

    /// Leased by a worker slot.
    Active,

    /// Failed, waiting for backoff.
    Retry,

    /// Dead. Kept for inspection, never dispatched again.
    Archived,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Scheduled => "scheduled",
            TaskState::Active => "active",
            TaskState::Retry => "retry",
            TaskState::Archived => "archived",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Archived)
    }

    /// Eligible for a dispatch claim.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Pending)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Scheduled, Pending)
                | (Retry, Pending)
                | (Active, Retry)
                | (Active, Archived)
                | (Active, Pending)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "scheduled" => Ok(TaskState::Scheduled),
            "active" => Ok(TaskState::Active),
            "retry" => Ok(TaskState::Retry),
            "archived" => Ok(TaskState::Archived),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Pending, TaskState::Active, true)]
    #[case(TaskState::Scheduled, TaskState::Pending, true)]
    #[case(TaskState::Retry, TaskState::Pending, true)]
    #[case(TaskState::Active, TaskState::Retry, true)]
    #[case(TaskState::Active, TaskState::Archived, true)]
    #[case(TaskState::Active, TaskState::Pending, true)]
    #[case(TaskState::Pending, TaskState::Archived, false)]
    #[case(TaskState::Scheduled, TaskState::Active, false)]
    #[case(TaskState::Archived, TaskState::Pending, false)]
    #[case(TaskState::Retry, TaskState::Active, false)]
    fn transitions(#[case] from: TaskState, #[case] to: TaskState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_pending_is_runnable() {
        assert!(TaskState::Pending.is_runnable());
        assert!(!TaskState::Scheduled.is_runnable());
        assert!(!TaskState::Retry.is_runnable());
        assert!(TaskState::Archived.is_terminal());
    }

    #[test]
    fn string_form_roundtrips() {
        for state in [
            TaskState::Pending,
            TaskState::Scheduled,
            TaskState::Active,
            TaskState::Retry,
            TaskState::Archived,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
    }
}
