//! Errors - エラー型と分類
//!
//! Conflicts (`AlreadyRunning`, `AlreadyCompleted`) are not errors; they are
//! returned as [`RejectReason`](super::RejectReason). Callback errors are not
//! wrapped either; they come back unchanged in `Outcome::Failed`.

use thiserror::Error;

use super::ids::RunId;
use crate::ports::StoreError;

/// Operational classification of a [`GuardError`].
///
/// - Infrastructure: the store failed or timed out (retry with backoff)
/// - LostOwnership: another run holds the key (abort the work)
/// - Invalid: bad input or an undecodable record (retrying will not help)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Infrastructure,
    LostOwnership,
    Invalid,
}

#[derive(Debug, Error)]
pub enum GuardError {
    /// The store call failed or exceeded its deadline.
    #[error("store unavailable during {op}: {source}")]
    StoreUnavailable {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// The handle's run no longer owns the key.
    #[error("lock lost: {key} is no longer held by {run_id}")]
    LockLost { key: String, run_id: RunId },

    #[error("invalid lock key: {0}")]
    InvalidKey(String),

    #[error("corrupt lock record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GuardError {
    pub fn store(op: &'static str, source: StoreError) -> Self {
        GuardError::StoreUnavailable { op, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::StoreUnavailable { .. } => ErrorKind::Infrastructure,
            GuardError::LockLost { .. } => ErrorKind::LostOwnership,
            GuardError::InvalidKey(_) | GuardError::Corrupt { .. } => ErrorKind::Invalid,
        }
    }

    pub fn is_lock_lost(&self) -> bool {
        matches!(self, GuardError::LockLost { .. })
    }

    /// Worth retrying with backoff (as opposed to "someone else is running this").
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}
