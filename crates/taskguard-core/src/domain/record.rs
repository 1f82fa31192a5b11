//! Lock record: the persisted unit of coordination.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RunId;
use super::key::{LockKey, ResourceId, TaskType};
use super::outcome::RejectReason;
use super::state::{LockPolicy, LockStatus, TerminalStatus};

/// One lock record per `(task_type, resource_id)`.
///
/// Design:
/// - This is the single source of truth for whether a job is running.
/// - State transitions happen through methods, never by poking fields.
/// - Timestamps come from the caller's clock so expiry is testable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub task_type: TaskType,
    pub resource_id: ResourceId,
    pub run_id: RunId,
    pub status: LockStatus,
    pub acquired_at: DateTime<Utc>,

    /// Last heartbeat or terminal write.
    pub updated_at: DateTime<Utc>,

    pub ttl_seconds: u64,
    pub policy: LockPolicy,
}

/// What an `acquire` should do about a record that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The record blocks this acquisition.
    Reject(RejectReason),

    /// The record is a RUNNING run whose TTL lapsed without renewal.
    TakeOver,

    /// The record is terminal and does not block; delete it and try again.
    ClearAndRetry,
}

/// Rounds a TTL up to whole seconds, never below one.
pub fn whole_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

impl LockRecord {
    /// Fresh RUNNING record for a new acquisition.
    pub fn running(
        key: &LockKey,
        run_id: RunId,
        policy: LockPolicy,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_type: key.task_type.clone(),
            resource_id: key.resource_id.clone(),
            run_id,
            status: LockStatus::Running,
            acquired_at: now,
            updated_at: now,
            ttl_seconds: whole_seconds(ttl),
            policy,
        }
    }

    pub fn key(&self) -> LockKey {
        LockKey::new(self.task_type.clone(), self.resource_id.clone())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Push `updated_at` forward (renewal).
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Terminal write.
    pub fn finish(&mut self, status: TerminalStatus, now: DateTime<Utc>) {
        self.status = status.into();
        self.updated_at = now;
    }

    /// When the record lapses if nobody renews it.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::try_seconds(self.ttl_seconds as i64).unwrap_or(TimeDelta::MAX);
        self.updated_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time since the last heartbeat or terminal write.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.updated_at)
    }

    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        self.age(now) > max_age
    }

    /// A RUNNING record whose TTL has lapsed with no renewal.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Running && self.is_older_than(self.ttl(), now)
    }

    /// Decide what an acquisition under `policy` does with this existing record.
    ///
    /// | state           | EXCLUSIVE        | CONCURRENT_GUARD |
    /// |-----------------|------------------|------------------|
    /// | RUNNING (fresh) | AlreadyRunning   | AlreadyRunning   |
    /// | RUNNING (stale) | take over        | take over        |
    /// | COMPLETED       | AlreadyCompleted | clear + retry    |
    /// | FAILED          | clear + retry    | clear + retry    |
    pub fn admission(&self, policy: LockPolicy, now: DateTime<Utc>) -> Admission {
        match (self.status, policy) {
            (LockStatus::Running, _) if self.is_stale(now) => Admission::TakeOver,
            (LockStatus::Running, _) => Admission::Reject(RejectReason::AlreadyRunning),
            (LockStatus::Completed, LockPolicy::Exclusive) => {
                Admission::Reject(RejectReason::AlreadyCompleted)
            }
            (LockStatus::Completed, LockPolicy::ConcurrentGuard) => Admission::ClearAndRetry,
            (LockStatus::Failed, _) => Admission::ClearAndRetry,
        }
    }

    /// Terminal record that no policy keeps around (lost delete).
    pub fn is_leftover(&self) -> bool {
        match self.status {
            LockStatus::Running => false,
            LockStatus::Completed => !self.policy.keeps_marker(TerminalStatus::Completed),
            LockStatus::Failed => true,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Extract only the fencing token from an encoded record.
///
/// Store implementations use this for their compare-and-* operations without
/// depending on the rest of the record layout.
pub fn peek_run_id(bytes: &[u8]) -> Option<RunId> {
    #[derive(Deserialize)]
    struct Fence {
        run_id: RunId,
    }
    serde_json::from_slice::<Fence>(bytes).ok().map(|f| f.run_id)
}
