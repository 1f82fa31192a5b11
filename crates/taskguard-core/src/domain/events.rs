//! Events - ガードで発生したイベント
//!
//! Emitted to an [`EventSink`](crate::ports::EventSink) at every decision
//! point worth observing.

use serde::Serialize;

use super::ids::RunId;
use super::key::LockKey;
use super::outcome::RejectReason;
use super::state::{LockPolicy, LockStatus, TerminalStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardEvent {
    Acquired {
        key: LockKey,
        run_id: RunId,
        policy: LockPolicy,
    },

    Rejected {
        key: LockKey,
        reason: RejectReason,
    },

    /// `acquire` found an abandoned RUNNING record and replaced it.
    ///
    /// The replacement is a single fenced write, so the store never holds the
    /// displaced run as FAILED; this event is where that FAILED is recorded.
    TakenOver {
        key: LockKey,
        previous_run_id: RunId,
        /// Always `FAILED`.
        previous_status: LockStatus,
        run_id: RunId,
    },

    Renewed {
        key: LockKey,
        run_id: RunId,
    },

    Released {
        key: LockKey,
        run_id: RunId,
        status: TerminalStatus,
    },

    LockLost {
        key: LockKey,
        run_id: RunId,
    },

    /// The reclaimer moved an abandoned RUNNING record to FAILED and removed it.
    Reclaimed {
        key: LockKey,
        run_id: RunId,
        idle_secs: i64,
    },

    /// The reclaimer removed a terminal record that should already be gone.
    Purged {
        key: LockKey,
        run_id: RunId,
        status: LockStatus,
    },

    /// Best-effort terminal write failed; the reclaimer will catch up.
    StatusWriteFailed {
        key: LockKey,
        run_id: RunId,
        status: TerminalStatus,
        error: String,
    },
}

impl GuardEvent {
    pub fn key(&self) -> &LockKey {
        match self {
            GuardEvent::Acquired { key, .. }
            | GuardEvent::Rejected { key, .. }
            | GuardEvent::TakenOver { key, .. }
            | GuardEvent::Renewed { key, .. }
            | GuardEvent::Released { key, .. }
            | GuardEvent::LockLost { key, .. }
            | GuardEvent::Reclaimed { key, .. }
            | GuardEvent::Purged { key, .. }
            | GuardEvent::StatusWriteFailed { key, .. } => key,
        }
    }

    /// Short snake_case name, same as the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            GuardEvent::Acquired { .. } => "acquired",
            GuardEvent::Rejected { .. } => "rejected",
            GuardEvent::TakenOver { .. } => "taken_over",
            GuardEvent::Renewed { .. } => "renewed",
            GuardEvent::Released { .. } => "released",
            GuardEvent::LockLost { .. } => "lock_lost",
            GuardEvent::Reclaimed { .. } => "reclaimed",
            GuardEvent::Purged { .. } => "purged",
            GuardEvent::StatusWriteFailed { .. } => "status_write_failed",
        }
    }
}
