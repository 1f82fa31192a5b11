//! Lock status and policy.
//!
//! # 状態遷移
//! - absent → RUNNING → COMPLETED | FAILED → deleted
//! - RUNNING だけが非終端状態。CANCELLED は存在しない（キャンセルは renew の LockLost で表現）
//!
//! Policy は「完了が次回の取得をブロックするか」を決めます。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state recorded in a lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    /// A run holds the lock.
    Running,

    /// The guarded callback returned normally.
    Completed,

    /// The callback failed, or the run was judged abandoned.
    Failed,
}

impl LockStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, LockStatus::Completed | LockStatus::Failed)
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockStatus::Running => "RUNNING",
            LockStatus::Completed => "COMPLETED",
            LockStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The statuses `release` may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

impl From<TerminalStatus> for LockStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => LockStatus::Completed,
            TerminalStatus::Failed => LockStatus::Failed,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LockStatus::from(*self).fmt(f)
    }
}

/// Whether completion of a run blocks future runs on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockPolicy {
    /// Once completed, the key stays blocked until explicitly cleared.
    /// For resource-heavy, non-idempotent jobs.
    Exclusive,

    /// Only a running record blocks. For idempotent analysis jobs.
    #[default]
    ConcurrentGuard,
}

impl LockPolicy {
    /// Does a terminal record with `status` survive the run that wrote it?
    pub fn keeps_marker(self, status: TerminalStatus) -> bool {
        matches!(
            (self, status),
            (LockPolicy::Exclusive, TerminalStatus::Completed)
        )
    }
}

impl fmt::Display for LockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockPolicy::Exclusive => "EXCLUSIVE",
            LockPolicy::ConcurrentGuard => "CONCURRENT_GUARD",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn statuses_serialize_as_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&LockStatus::Running).unwrap(), "\"RUNNING\"");
        assert_eq!(serde_json::to_string(&LockStatus::Completed).unwrap(), "\"COMPLETED\"");
        assert_eq!(
            serde_json::to_string(&LockPolicy::ConcurrentGuard).unwrap(),
            "\"CONCURRENT_GUARD\""
        );
    }

    #[test]
    fn default_policy_is_concurrent_guard() {
        assert_eq!(LockPolicy::default(), LockPolicy::ConcurrentGuard);
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!LockStatus::Running.is_terminal());
        assert!(LockStatus::Completed.is_terminal());
        assert!(LockStatus::Failed.is_terminal());
    }

    #[rstest]
    #[case(LockPolicy::Exclusive, TerminalStatus::Completed, true)]
    #[case(LockPolicy::Exclusive, TerminalStatus::Failed, false)]
    #[case(LockPolicy::ConcurrentGuard, TerminalStatus::Completed, false)]
    #[case(LockPolicy::ConcurrentGuard, TerminalStatus::Failed, false)]
    fn only_exclusive_completion_keeps_a_marker(
        #[case] policy: LockPolicy,
        #[case] status: TerminalStatus,
        #[case] expected: bool,
    ) {
        assert_eq!(policy.keeps_marker(status), expected);
    }
}
