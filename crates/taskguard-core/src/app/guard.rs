//! Guard - acquisition, release, renewal and scoped execution.
//!
//! # フロー（run_guarded）
//! 1. `acquire`: set-if-absent で RUNNING レコードを書く
//! 2. 既存レコードがあれば policy 表（LockRecord::admission）に従って
//!    reject / take over / clear + retry
//! 3. callback 実行（LockHandle を渡すので renew できる）
//! 4. 結果に応じて COMPLETED / FAILED を書き、必要なら削除
//!
//! The guard keeps no lock state in process. Every state-changing write is
//! fenced by the `run_id` the write was decided on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::app::heartbeat::{Heartbeat, renew_interval};
use crate::app::reclaimer::Reclaimer;
use crate::app::status::LockSnapshot;
use crate::config::GuardConfig;
use crate::domain::{
    Acquisition, Admission, GuardError, GuardEvent, LockHandle, LockKey, LockPolicy, LockRecord,
    LockStatus, Outcome, RejectReason, ReleaseOutcome, ResourceId, TerminalStatus,
};
use crate::ports::{Clock, EventSink, IdGenerator, StoreError, TtlStore};
use crate::typed::GuardedTask;

/// Attempts at set-if-absent per `acquire` (the first try plus one retry).
const MAX_ACQUIRE_ATTEMPTS: usize = 2;

/// Guard は共有 TTL ストア上のロックプロトコル
///
/// Cheap to clone; every clone talks to the same store. Build one with
/// [`GuardBuilder`](crate::app::GuardBuilder).
#[derive(Clone)]
pub struct Guard {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    config: Arc<GuardConfig>,
}

impl Guard {
    pub(crate) fn new(
        store: Arc<dyn TtlStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
        config: GuardConfig,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            events,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Try to take the lock for `(task_type, resource_id)`. Never waits.
    ///
    /// A stale RUNNING record is replaced in one fenced write. The displaced
    /// run is reported as FAILED through [`GuardEvent::TakenOver`], not in
    /// the store.
    pub async fn acquire(
        &self,
        task_type: &str,
        resource_id: impl Into<ResourceId>,
        policy: LockPolicy,
        ttl: Duration,
    ) -> Result<Acquisition, GuardError> {
        let key = LockKey::parse(task_type, resource_id)?;
        self.acquire_key(key, policy, ttl).await
    }

    pub async fn acquire_key(
        &self,
        key: LockKey,
        policy: LockPolicy,
        ttl: Duration,
    ) -> Result<Acquisition, GuardError> {
        let store_key = key.store_key(self.namespace());

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let record = LockRecord::running(
                &key,
                self.ids.generate_run_id(),
                policy,
                ttl,
                self.clock.now(),
            );
            let bytes = self.encode(&store_key, &record)?;
            let written = self
                .call(
                    "set_if_absent",
                    self.store.set_if_absent(&store_key, bytes, record.ttl()),
                )
                .await?;
            if written {
                return Ok(self.acquired(key, store_key, &record));
            }

            let Some(existing) = self.read(&store_key).await? else {
                tracing::debug!(%key, attempt, "lock vanished before it could be read");
                continue;
            };

            match existing.admission(policy, self.clock.now()) {
                Admission::Reject(reason) => return Ok(self.rejected(key, reason)),
                Admission::TakeOver => {
                    let bytes = self.encode(&store_key, &record)?;
                    let replaced = self
                        .call(
                            "compare_and_update",
                            self.store.compare_and_update(
                                &store_key,
                                &existing.run_id,
                                bytes,
                                Some(record.ttl()),
                            ),
                        )
                        .await?;
                    if replaced {
                        self.events.emit(&GuardEvent::TakenOver {
                            key: key.clone(),
                            previous_run_id: existing.run_id,
                            previous_status: LockStatus::Failed,
                            run_id: record.run_id,
                        });
                        return Ok(self.acquired(key, store_key, &record));
                    }
                    tracing::debug!(%key, attempt, "stale lock changed hands before takeover");
                }
                Admission::ClearAndRetry => {
                    let cleared = self
                        .call(
                            "compare_and_delete",
                            self.store.compare_and_delete(&store_key, &existing.run_id),
                        )
                        .await?;
                    tracing::debug!(
                        %key,
                        attempt,
                        status = %existing.status,
                        cleared,
                        "terminal record does not block, retrying"
                    );
                }
            }
        }

        // Lost every race we were allowed to retry; someone else is on it.
        Ok(self.rejected(key, RejectReason::AlreadyRunning))
    }

    /// Run `callback` while holding the lock.
    ///
    /// The callback receives the [`LockHandle`] so it can `renew` (or start a
    /// [`Heartbeat`]). On return the guard writes COMPLETED or FAILED; that
    /// write is best-effort and never changes the returned outcome. A panic in
    /// the callback is recorded as FAILED and then resumed.
    pub async fn run_guarded<F, Fut, T, E>(
        &self,
        task_type: &str,
        resource_id: impl Into<ResourceId>,
        policy: LockPolicy,
        ttl: Duration,
        callback: F,
    ) -> Result<Outcome<T, E>, GuardError>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let handle = match self.acquire(task_type, resource_id, policy, ttl).await? {
            Acquisition::Acquired(handle) => handle,
            Acquisition::Rejected(reason) => return Ok(Outcome::Rejected(reason)),
        };
        Ok(self.run_with_handle(handle, callback).await)
    }

    /// `run_guarded` with the policy and TTL taken from the config.
    pub async fn run_configured<F, Fut, T, E>(
        &self,
        task_type: &str,
        resource_id: impl Into<ResourceId>,
        callback: F,
    ) -> Result<Outcome<T, E>, GuardError>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let policy = self.config.policy_for(task_type);
        let ttl = self.config.default_ttl();
        self.run_guarded(task_type, resource_id, policy, ttl, callback)
            .await
    }

    /// Run a typed task.
    ///
    /// Policy: an explicit config entry for `T::TYPE` wins, then `T::POLICY`,
    /// then the config default.
    pub async fn run_task<T: GuardedTask>(
        &self,
        task: T,
    ) -> Result<Outcome<T::Output, T::Error>, GuardError> {
        let policy = self.policy_for_task::<T>();
        let ttl = task.ttl().unwrap_or_else(|| self.config.default_ttl());
        let resource_id = task.resource_id();
        self.run_guarded(T::TYPE, resource_id, policy, ttl, move |handle| {
            task.run(handle)
        })
        .await
    }

    pub fn policy_for_task<T: GuardedTask>(&self) -> LockPolicy {
        if self.config.has_explicit_policy(T::TYPE) {
            self.config.policy_for(T::TYPE)
        } else {
            T::POLICY.unwrap_or(self.config.default_policy)
        }
    }

    async fn run_with_handle<F, Fut, T, E>(&self, handle: LockHandle, callback: F) -> Outcome<T, E>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let work = {
            let handle = handle.clone();
            async move { callback(handle).await }
        };

        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(value)) => {
                self.finish_quietly(&handle, TerminalStatus::Completed)
                    .await;
                Outcome::Completed(value)
            }
            Ok(Err(err)) => {
                self.finish_quietly(&handle, TerminalStatus::Failed).await;
                Outcome::Failed(err)
            }
            Err(panic) => {
                tracing::error!(key = %handle.key(), run_id = %handle.run_id(), "guarded callback panicked");
                self.finish_quietly(&handle, TerminalStatus::Failed).await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Terminal write whose failure is logged, not escalated.
    async fn finish_quietly(&self, handle: &LockHandle, status: TerminalStatus) {
        match self.release(handle, status).await {
            Ok(ReleaseOutcome::NotOwner) => {
                tracing::warn!(
                    key = %handle.key(),
                    run_id = %handle.run_id(),
                    %status,
                    "lock was taken over before the run finished"
                );
            }
            Ok(_) => {}
            Err(err) => {
                self.events.emit(&GuardEvent::StatusWriteFailed {
                    key: handle.key().clone(),
                    run_id: handle.run_id(),
                    status,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Idempotent terminal write for a run this handle owns.
    ///
    /// COMPLETED under EXCLUSIVE stays as a completion marker (expiring after
    /// `completed_marker_ttl_secs` if configured); everything else is deleted
    /// right after the write.
    pub async fn release(
        &self,
        handle: &LockHandle,
        status: TerminalStatus,
    ) -> Result<ReleaseOutcome, GuardError> {
        let store_key = handle.store_key();
        let Some(mut record) = self.read(store_key).await? else {
            return Ok(ReleaseOutcome::AlreadyReleased);
        };
        if record.run_id != handle.run_id() {
            return Ok(ReleaseOutcome::NotOwner);
        }

        if record.status.is_terminal() {
            // Already finished (by us, or FAILED by the reclaimer). Only finish
            // a delete that was lost earlier.
            if record.is_leftover() {
                self.delete_owned(store_key, handle).await?;
            }
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        let keep = handle.policy().keeps_marker(status);
        record.finish(status, self.clock.now());
        let ttl = if keep {
            self.config.completed_marker_ttl()
        } else {
            Some(handle.ttl())
        };
        let bytes = self.encode(store_key, &record)?;
        let written = self
            .call(
                "compare_and_update",
                self.store
                    .compare_and_update(store_key, &handle.run_id(), bytes, ttl),
            )
            .await?;
        if !written {
            return Ok(ReleaseOutcome::NotOwner);
        }
        if !keep {
            self.delete_owned(store_key, handle).await?;
        }

        self.events.emit(&GuardEvent::Released {
            key: handle.key().clone(),
            run_id: handle.run_id(),
            status,
        });
        Ok(ReleaseOutcome::Released)
    }

    /// Heartbeat: push `updated_at` and the store expiry forward.
    ///
    /// Returns `GuardError::LockLost` once the key is gone, finished, or owned
    /// by another run. Treat that as cancellation and stop working.
    pub async fn renew(&self, handle: &LockHandle) -> Result<(), GuardError> {
        let store_key = handle.store_key();
        let current = self.read(store_key).await?;
        let mut record = match current {
            Some(record)
                if record.run_id == handle.run_id() && record.status == LockStatus::Running =>
            {
                record
            }
            _ => return Err(self.lock_lost(handle)),
        };

        record.heartbeat(self.clock.now());
        let bytes = self.encode(store_key, &record)?;
        let renewed = self
            .call(
                "compare_and_update",
                self.store.compare_and_update(
                    store_key,
                    &handle.run_id(),
                    bytes,
                    Some(handle.ttl()),
                ),
            )
            .await?;
        if !renewed {
            return Err(self.lock_lost(handle));
        }

        self.events.emit(&GuardEvent::Renewed {
            key: handle.key().clone(),
            run_id: handle.run_id(),
        });
        Ok(())
    }

    /// Spawn a background renewal for `handle`, at the configured interval or
    /// a third of the handle's TTL, whichever is shorter.
    pub fn heartbeat(&self, handle: &LockHandle) -> Heartbeat {
        let interval = renew_interval(self.config.heartbeat_interval(), handle.ttl());
        Heartbeat::spawn(self.clone(), handle.clone(), interval)
    }

    /// Read-only view of the current record.
    pub async fn inspect(
        &self,
        task_type: &str,
        resource_id: impl Into<ResourceId>,
    ) -> Result<Option<LockRecord>, GuardError> {
        let key = LockKey::parse(task_type, resource_id)?;
        self.read(&key.store_key(self.namespace())).await
    }

    /// Serializable status view for status endpoints.
    pub async fn snapshot(
        &self,
        task_type: &str,
        resource_id: impl Into<ResourceId>,
    ) -> Result<Option<LockSnapshot>, GuardError> {
        let now = self.clock.now();
        Ok(self
            .inspect(task_type, resource_id)
            .await?
            .map(|record| LockSnapshot::from_record(&record, now)))
    }

    /// Every decodable record in the namespace.
    pub async fn list(&self) -> Result<Vec<LockSnapshot>, GuardError> {
        let now = self.clock.now();
        let entries = self
            .call("scan", self.store.scan(self.namespace()))
            .await?;
        let snapshots = entries
            .into_iter()
            .filter_map(|(key, bytes)| match LockRecord::decode(&bytes) {
                Ok(record) => Some(LockSnapshot::from_record(&record, now)),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "skipping undecodable lock record");
                    None
                }
            })
            .collect();
        Ok(snapshots)
    }

    /// Remove a terminal record, typically an EXCLUSIVE completion marker, so
    /// the job may run again. RUNNING records are left alone (`false`).
    pub async fn clear(
        &self,
        task_type: &str,
        resource_id: impl Into<ResourceId>,
    ) -> Result<bool, GuardError> {
        let key = LockKey::parse(task_type, resource_id)?;
        let store_key = key.store_key(self.namespace());
        let Some(record) = self.read(&store_key).await? else {
            return Ok(false);
        };
        if record.status == LockStatus::Running {
            tracing::info!(%key, run_id = %record.run_id, "refusing to clear a running lock");
            return Ok(false);
        }
        let cleared = self
            .call(
                "compare_and_delete",
                self.store.compare_and_delete(&store_key, &record.run_id),
            )
            .await?;
        if cleared {
            tracing::info!(%key, status = %record.status, "lock record cleared");
        }
        Ok(cleared)
    }

    pub fn reclaimer(&self) -> Reclaimer {
        Reclaimer::new(self.clone())
    }

    // ------------------------------------------------------------------
    // crate-internal plumbing shared with the reclaimer
    // ------------------------------------------------------------------

    pub(crate) fn store(&self) -> &dyn TtlStore {
        self.store.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    /// Bound a store call by `store_timeout`.
    pub(crate) async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, GuardError> {
        let deadline = self.config.store_timeout();
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(GuardError::store(op, err)),
            Err(_) => Err(GuardError::store(op, StoreError::Timeout(deadline))),
        }
    }

    pub(crate) async fn read(&self, store_key: &str) -> Result<Option<LockRecord>, GuardError> {
        let Some(bytes) = self.call("get", self.store.get(store_key)).await? else {
            return Ok(None);
        };
        LockRecord::decode(&bytes)
            .map(Some)
            .map_err(|source| GuardError::Corrupt {
                key: store_key.to_string(),
                source,
            })
    }

    pub(crate) fn encode(&self, store_key: &str, record: &LockRecord) -> Result<Vec<u8>, GuardError> {
        record.encode().map_err(|source| GuardError::Corrupt {
            key: store_key.to_string(),
            source,
        })
    }

    async fn delete_owned(&self, store_key: &str, handle: &LockHandle) -> Result<bool, GuardError> {
        self.call(
            "compare_and_delete",
            self.store.compare_and_delete(store_key, &handle.run_id()),
        )
        .await
    }

    fn acquired(&self, key: LockKey, store_key: String, record: &LockRecord) -> Acquisition {
        self.events.emit(&GuardEvent::Acquired {
            key: key.clone(),
            run_id: record.run_id,
            policy: record.policy,
        });
        Acquisition::Acquired(LockHandle::new(
            key,
            store_key,
            record.run_id,
            record.policy,
            record.ttl(),
        ))
    }

    fn rejected(&self, key: LockKey, reason: RejectReason) -> Acquisition {
        self.events.emit(&GuardEvent::Rejected { key, reason });
        Acquisition::Rejected(reason)
    }

    fn lock_lost(&self, handle: &LockHandle) -> GuardError {
        self.events.emit(&GuardEvent::LockLost {
            key: handle.key().clone(),
            run_id: handle.run_id(),
        });
        GuardError::LockLost {
            key: handle.key().to_string(),
            run_id: handle.run_id(),
        }
    }
}
