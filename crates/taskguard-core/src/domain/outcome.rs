//! Outcome model: what a guarded run, an acquisition or a release produced.
//!
//! Rejections are normal, cheap results (the caller reports "already in
//! progress" upstream), so they live here rather than in the error type.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::handle::LockHandle;

/// Why an acquisition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Another run holds an unexpired RUNNING record.
    AlreadyRunning,

    /// An EXCLUSIVE job already completed on this resource.
    AlreadyCompleted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AlreadyRunning => f.write_str("already running"),
            RejectReason::AlreadyCompleted => f.write_str("already completed"),
        }
    }
}

/// Result of `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(LockHandle),
    Rejected(RejectReason),
}

impl Acquisition {
    pub fn handle(&self) -> Option<&LockHandle> {
        match self {
            Acquisition::Acquired(handle) => Some(handle),
            Acquisition::Rejected(_) => None,
        }
    }

    pub fn into_handle(self) -> Option<LockHandle> {
        match self {
            Acquisition::Acquired(handle) => Some(handle),
            Acquisition::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            Acquisition::Acquired(_) => None,
            Acquisition::Rejected(reason) => Some(*reason),
        }
    }
}

/// Result of `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The terminal status was written by this call.
    Released,

    /// Nothing to do: the record is gone or this run already reached a terminal state.
    AlreadyReleased,

    /// Another run holds the key now; nothing was touched.
    NotOwner,
}

/// Result of `run_guarded`.
///
/// - `Completed`: the callback returned normally.
/// - `Failed`: the callback's own error, returned unchanged.
/// - `Rejected`: the callback was never invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Completed(T),
    Failed(E),
    Rejected(RejectReason),
}

impl<T, E> Outcome<T, E> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            Outcome::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Collapse into a `Result`, mapping a rejection with `on_reject`.
    pub fn into_result(self, on_reject: impl FnOnce(RejectReason) -> E) -> Result<T, E> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
            Outcome::Rejected(reason) => Err(on_reject(reason)),
        }
    }
}
