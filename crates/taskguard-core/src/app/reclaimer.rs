//! Reclaimer - 放置されたロックの回収
//!
//! # フロー（reclaim）
//! 1. namespace を scan
//! 2. RUNNING かつ TTL 切れ、さらに updated_at が max_age より古い → 再読込して変化がなければ
//!    FAILED を書いてから削除（run_id で fence）
//! 3. 削除し損ねた終端レコード（FAILED / CONCURRENT_GUARD の COMPLETED）で
//!    max_age より古いもの → 削除
//! 4. デコードできないエントリは触らずにスキップ
//!
//! A reclaim pass only removes records whose owners went away; a run that
//! heartbeats between the scan and the write keeps its lock.

use std::time::Duration;

use serde::Serialize;

use crate::app::guard::Guard;
use crate::domain::{GuardError, GuardEvent, LockKey, LockRecord, LockStatus, TerminalStatus};

/// What one `reclaim` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub scanned: usize,

    /// RUNNING records marked FAILED and removed.
    pub reclaimed: Vec<LockKey>,

    /// Terminal leftovers removed.
    pub purged: Vec<LockKey>,

    /// Entries that could not be decoded.
    pub skipped: usize,

    /// Entries whose reclaim hit a store error (left for the next pass).
    pub errors: usize,
}

impl ReclaimReport {
    /// Nothing was changed or went wrong.
    pub fn is_quiet(&self) -> bool {
        self.reclaimed.is_empty() && self.purged.is_empty() && self.skipped == 0 && self.errors == 0
    }
}

#[derive(Clone)]
pub struct Reclaimer {
    guard: Guard,
}

impl Reclaimer {
    pub fn new(guard: Guard) -> Self {
        Self { guard }
    }

    /// One pass over the namespace.
    ///
    /// Fails only when the scan itself fails; per-entry store errors are
    /// counted in the report.
    pub async fn reclaim(&self, max_age: Duration) -> Result<ReclaimReport, GuardError> {
        let guard = &self.guard;
        let entries = guard
            .call("scan", guard.store().scan(guard.namespace()))
            .await?;

        let mut report = ReclaimReport {
            scanned: entries.len(),
            ..ReclaimReport::default()
        };

        for (store_key, bytes) in entries {
            let observed = match LockRecord::decode(&bytes) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(key = %store_key, error = %err, "skipping undecodable lock record");
                    report.skipped += 1;
                    continue;
                }
            };

            let now = guard.clock().now();
            if !observed.is_older_than(max_age, now) {
                continue;
            }
            // TTL が残っている RUNNING は holder がまだ生きている
            if observed.status == LockStatus::Running && !observed.is_stale(now) {
                continue;
            }

            let (result, removed) = if observed.status == LockStatus::Running {
                (
                    self.reclaim_running(&store_key, &observed, max_age).await,
                    &mut report.reclaimed,
                )
            } else if observed.is_leftover() {
                (
                    self.purge_leftover(&store_key, &observed).await,
                    &mut report.purged,
                )
            } else {
                continue;
            };

            match result {
                Ok(true) => removed.push(observed.key()),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(key = %store_key, error = %err, "reclaim failed; will retry next pass");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn reclaim_running(
        &self,
        store_key: &str,
        observed: &LockRecord,
        max_age: Duration,
    ) -> Result<bool, GuardError> {
        let guard = &self.guard;

        // A heartbeat or takeover since the scan means the record is in use.
        let Some(current) = guard.read(store_key).await? else {
            return Ok(false);
        };
        let now = guard.clock().now();
        if current.run_id != observed.run_id
            || current.updated_at != observed.updated_at
            || current.status != LockStatus::Running
            || !current.is_stale(now)
            || !current.is_older_than(max_age, now)
        {
            return Ok(false);
        }

        let mut failed = current;
        failed.finish(TerminalStatus::Failed, now);
        let bytes = guard.encode(store_key, &failed)?;
        let marked = guard
            .call(
                "compare_and_update",
                guard.store().compare_and_update(
                    store_key,
                    &observed.run_id,
                    bytes,
                    Some(failed.ttl()),
                ),
            )
            .await?;
        if !marked {
            return Ok(false);
        }
        guard
            .call(
                "compare_and_delete",
                guard.store().compare_and_delete(store_key, &observed.run_id),
            )
            .await?;

        guard.events().emit(&GuardEvent::Reclaimed {
            key: observed.key(),
            run_id: observed.run_id,
            idle_secs: observed.age(now).num_seconds(),
        });
        Ok(true)
    }

    async fn purge_leftover(
        &self,
        store_key: &str,
        observed: &LockRecord,
    ) -> Result<bool, GuardError> {
        let guard = &self.guard;
        let purged = guard
            .call(
                "compare_and_delete",
                guard.store().compare_and_delete(store_key, &observed.run_id),
            )
            .await?;
        if purged {
            guard.events().emit(&GuardEvent::Purged {
                key: observed.key(),
                run_id: observed.run_id,
                status: observed.status,
            });
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::GuardBuilder;
    use crate::domain::{LockPolicy, RejectReason, RunId};
    use crate::impls::{InMemoryTtlStore, RecordingEventSink};
    use crate::ports::{Clock, FixedClock, StoreError, TtlStore};
    use async_trait::async_trait;
    use ulid::Ulid;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryTtlStore>,
        events: Arc<RecordingEventSink>,
        guard: Guard,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::default());
        let store = Arc::new(InMemoryTtlStore::new(clock.clone()));
        let events = Arc::new(RecordingEventSink::new());
        let guard = GuardBuilder::new()
            .with_store(store.clone())
            .with_clock(clock.clone())
            .with_event_sink(events.clone())
            .build()
            .unwrap();
        Fixture {
            clock,
            store,
            events,
            guard,
        }
    }

    /// Writes a record whose store expiry outlives its logical TTL, the way a
    /// record survives when the store's own expiry did not fire.
    async fn plant(f: &Fixture, resource: &str, status: LockStatus, policy: LockPolicy) -> LockRecord {
        let key = LockKey::parse("data_profiling", resource).unwrap();
        let mut record = LockRecord::running(
            &key,
            RunId::from_ulid(Ulid::new()),
            policy,
            Duration::from_secs(60),
            f.clock.now(),
        );
        record.status = status;
        let written = f
            .store
            .set_if_absent(
                &key.store_key(f.guard.namespace()),
                record.encode().unwrap(),
                Duration::from_secs(86_400),
            )
            .await
            .unwrap();
        assert!(written);
        record
    }

    #[tokio::test]
    async fn abandoned_running_lock_is_marked_failed_and_removed() {
        let f = fixture();
        plant(&f, "ds-1", LockStatus::Running, LockPolicy::ConcurrentGuard).await;
        f.clock.advance(Duration::from_secs(120));

        let report = f.guard.reclaimer().reclaim(Duration::from_secs(90)).await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.reclaimed, vec![LockKey::parse("data_profiling", "ds-1").unwrap()]);
        assert!(f.store.is_empty().await);
        assert_eq!(f.events.names(), vec!["reclaimed"]);
    }

    #[tokio::test]
    async fn recent_locks_are_left_alone() {
        let f = fixture();
        plant(&f, "ds-1", LockStatus::Running, LockPolicy::ConcurrentGuard).await;
        f.clock.advance(Duration::from_secs(30));

        let report = f.guard.reclaimer().reclaim(Duration::from_secs(90)).await.unwrap();

        assert!(report.is_quiet());
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn exclusive_completion_markers_survive_reclaim() {
        let f = fixture();
        plant(&f, "ds-1", LockStatus::Completed, LockPolicy::Exclusive).await;
        plant(&f, "ds-2", LockStatus::Failed, LockPolicy::Exclusive).await;
        plant(&f, "ds-3", LockStatus::Completed, LockPolicy::ConcurrentGuard).await;
        f.clock.advance(Duration::from_secs(3_600));

        let report = f.guard.reclaimer().reclaim(Duration::from_secs(90)).await.unwrap();

        assert!(report.reclaimed.is_empty());
        assert_eq!(report.purged.len(), 2);
        let remaining = f.guard.inspect("data_profiling", "ds-1").await.unwrap().unwrap();
        assert_eq!(remaining.status, LockStatus::Completed);
        assert_eq!(f.events.count("purged"), 2);
    }

    #[tokio::test]
    async fn undecodable_entries_are_skipped() {
        let f = fixture();
        f.store
            .set_if_absent("taskguard:junk:1", b"not a record".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let report = f.guard.reclaimer().reclaim(Duration::from_secs(1)).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn live_run_with_a_long_ttl_survives_reclaim() {
        let f = fixture();
        let handle = f
            .guard
            .acquire("data_profiling", "ds-1", LockPolicy::ConcurrentGuard, Duration::from_secs(3_600))
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        f.clock.advance(Duration::from_secs(1_000));

        let report = f.guard.reclaimer().reclaim(Duration::from_secs(900)).await.unwrap();

        assert!(report.reclaimed.is_empty());
        assert_eq!(f.events.count("reclaimed"), 0);
        let second = f
            .guard
            .acquire("data_profiling", "ds-1", LockPolicy::ConcurrentGuard, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(second.rejection(), Some(RejectReason::AlreadyRunning));
        f.guard.renew(&handle).await.unwrap();
    }

    /// scan だけ古いスナップショットを返すストア
    struct LaggingScan {
        inner: Arc<InMemoryTtlStore>,
        snapshot: Vec<(String, Vec<u8>)>,
    }

    #[async_trait]
    impl TtlStore for LaggingScan {
        async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn compare_and_delete(&self, key: &str, expected_run_id: &RunId) -> Result<bool, StoreError> {
            self.inner.compare_and_delete(key, expected_run_id).await
        }

        async fn compare_and_update(
            &self,
            key: &str,
            expected_run_id: &RunId,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> Result<bool, StoreError> {
            self.inner.compare_and_update(key, expected_run_id, value, ttl).await
        }

        async fn scan(&self, _prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
            Ok(self.snapshot.clone())
        }
    }

    async fn lagging_reclaimer(f: &Fixture) -> Reclaimer {
        let snapshot = f.store.scan(f.guard.namespace()).await.unwrap();
        let lagging = Arc::new(LaggingScan {
            inner: f.store.clone(),
            snapshot,
        });
        GuardBuilder::new()
            .with_store(lagging)
            .with_clock(f.clock.clone())
            .with_event_sink(f.events.clone())
            .build()
            .unwrap()
            .reclaimer()
    }

    #[tokio::test]
    async fn renewal_after_the_scan_keeps_the_lock() {
        let f = fixture();
        let planted = plant(&f, "ds-1", LockStatus::Running, LockPolicy::ConcurrentGuard).await;
        let reclaimer = lagging_reclaimer(&f).await;
        f.clock.advance(Duration::from_secs(120));

        // scan の後に holder が heartbeat した
        let mut renewed = planted.clone();
        renewed.heartbeat(f.clock.now());
        let store_key = planted.key().store_key(f.guard.namespace());
        assert!(f
            .store
            .compare_and_update(&store_key, &planted.run_id, renewed.encode().unwrap(), None)
            .await
            .unwrap());

        let report = reclaimer.reclaim(Duration::from_secs(90)).await.unwrap();

        assert!(report.reclaimed.is_empty());
        assert_eq!(report.errors, 0);
        let current = f.guard.inspect("data_profiling", "ds-1").await.unwrap().unwrap();
        assert_eq!(current, renewed);
        assert_eq!(f.events.count("reclaimed"), 0);
    }

    #[tokio::test]
    async fn takeover_after_the_scan_keeps_the_new_owner() {
        let f = fixture();
        let planted = plant(&f, "ds-1", LockStatus::Running, LockPolicy::ConcurrentGuard).await;
        let reclaimer = lagging_reclaimer(&f).await;
        f.clock.advance(Duration::from_secs(120));

        let owner = f
            .guard
            .acquire("data_profiling", "ds-1", LockPolicy::ConcurrentGuard, Duration::from_secs(60))
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        assert_ne!(owner.run_id(), planted.run_id);
        let before = f.guard.inspect("data_profiling", "ds-1").await.unwrap().unwrap();

        let report = reclaimer.reclaim(Duration::from_secs(90)).await.unwrap();

        assert!(report.reclaimed.is_empty());
        assert_eq!(report.errors, 0);
        let after = f.guard.inspect("data_profiling", "ds-1").await.unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.run_id, owner.run_id());
        assert_eq!(after.status, LockStatus::Running);
        assert_eq!(f.events.count("reclaimed"), 0);
    }

    #[tokio::test]
    async fn scan_failure_is_an_error() {
        let f = fixture();
        f.store.set_offline(true);
        let err = f.guard.reclaimer().reclaim(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
