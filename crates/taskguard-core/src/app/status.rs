//! Status - ステータスクエリ用のビュー
//!
//! `LockRecord` をそのまま外に出さず、時刻を epoch ミリ秒にした
//! シリアライズ向けのスナップショットを返す。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LockPolicy, LockRecord, LockStatus, RunId};

/// One lock record as a status endpoint would show it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    /// `task_type:resource_id`, without the namespace.
    pub lock_key: String,
    pub task_type: String,
    pub resource_id: String,
    pub run_id: RunId,
    pub status: LockStatus,
    pub policy: LockPolicy,
    pub acquired_at_ms: i64,
    pub updated_at_ms: i64,
    pub expires_at_ms: i64,
    pub ttl_seconds: u64,

    /// RUNNING past its TTL with no renewal.
    pub stale: bool,
}

impl LockSnapshot {
    pub fn from_record(record: &LockRecord, now: DateTime<Utc>) -> Self {
        Self {
            lock_key: record.key().to_string(),
            task_type: record.task_type.to_string(),
            resource_id: record.resource_id.to_string(),
            run_id: record.run_id,
            status: record.status,
            policy: record.policy,
            acquired_at_ms: record.acquired_at.timestamp_millis(),
            updated_at_ms: record.updated_at.timestamp_millis(),
            expires_at_ms: record.expires_at().timestamp_millis(),
            ttl_seconds: record.ttl_seconds,
            stale: record.is_stale(now),
        }
    }
}

/// Totals over a namespace listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCounts {
    pub running: usize,
    pub stale: usize,
    pub completed: usize,
    pub failed: usize,
}

impl LockCounts {
    pub fn tally(snapshots: &[LockSnapshot]) -> Self {
        let mut counts = Self::default();
        for s in snapshots {
            match s.status {
                LockStatus::Running if s.stale => counts.stale += 1,
                LockStatus::Running => counts.running += 1,
                LockStatus::Completed => counts.completed += 1,
                LockStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
