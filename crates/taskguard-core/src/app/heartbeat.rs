//! Heartbeat - 長時間ジョブ用の自動 renew
//!
//! Spawns a task that calls `Guard::renew` every interval. When renewal
//! reports `LockLost` the task stops and flips the lost flag; the job should
//! check it (or await `lost()`) and abandon its work. Transient store errors
//! are logged and retried on the next tick, which is safe as long as the
//! interval is well under the TTL.
//!
//! Dropping the `Heartbeat` stops renewal.
//!
//! The interval never exceeds a third of the lock's TTL, so a handle acquired
//! with a short TTL is renewed before its key expires.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app::guard::Guard;
use crate::domain::LockHandle;

/// 短すぎる TTL でも renew でストアを叩き続けない下限
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(100);

/// Renewal interval for a lock with `ttl`: the configured interval, capped at
/// a third of the TTL.
pub fn renew_interval(configured: Duration, ttl: Duration) -> Duration {
    configured.min(ttl / 3).max(MIN_RENEW_INTERVAL)
}

pub struct Heartbeat {
    lost_rx: watch::Receiver<bool>,
    join: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn(guard: Guard, handle: LockHandle, interval: Duration) -> Self {
        let (lost_tx, lost_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 最初の tick は即時なので読み捨てる（acquire 直後に renew しない）
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match guard.renew(&handle).await {
                    Ok(()) => {}
                    Err(err) if err.is_lock_lost() => {
                        let _ = lost_tx.send(true);
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            key = %handle.key(),
                            run_id = %handle.run_id(),
                            error = %err,
                            "heartbeat renewal failed; retrying next tick"
                        );
                    }
                }
            }
        });
        Self { lost_rx, join }
    }

    pub fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }

    /// Resolves once the lock is lost. Pends forever while renewal succeeds.
    pub async fn lost(&mut self) {
        if self.lost_rx.wait_for(|lost| *lost).await.is_err() {
            // renewal task ended without losing the lock (stopped)
            std::future::pending::<()>().await;
        }
    }

    /// Extra receiver for code that does not own the heartbeat.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.lost_rx.clone()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::GuardBuilder;
    use crate::domain::LockPolicy;
    use crate::impls::{InMemoryTtlStore, RecordingEventSink};

    #[test]
    fn renew_interval_is_capped_by_the_ttl() {
        let configured = Duration::from_secs(60);
        assert_eq!(renew_interval(configured, Duration::from_secs(30)), Duration::from_secs(10));
        assert_eq!(renew_interval(configured, Duration::from_secs(600)), configured);
        assert_eq!(
            renew_interval(Duration::from_secs(5), Duration::from_millis(30)),
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn short_ttl_lock_is_kept_alive_by_the_guard_heartbeat() {
        let store = Arc::new(InMemoryTtlStore::default());
        let events = Arc::new(RecordingEventSink::new());
        let guard = GuardBuilder::new()
            .with_store(store)
            .with_event_sink(events.clone())
            .build()
            .unwrap();
        assert_eq!(guard.config().heartbeat_interval(), Duration::from_secs(60));
        let handle = guard
            .acquire("video_analysis", "v-2", LockPolicy::Exclusive, Duration::from_secs(1))
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        let heartbeat = guard.heartbeat(&handle);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(events.count("renewed") >= 2);
        assert!(!heartbeat.is_lost());
        let record = guard.inspect("video_analysis", "v-2").await.unwrap().unwrap();
        assert_eq!(record.run_id, handle.run_id());
        let rival = guard
            .acquire("video_analysis", "v-2", LockPolicy::Exclusive, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rival.rejection(), Some(crate::domain::RejectReason::AlreadyRunning));
    }

    #[tokio::test]
    async fn heartbeat_renews_until_dropped() {
        let store = Arc::new(InMemoryTtlStore::default());
        let events = Arc::new(RecordingEventSink::new());
        let guard = GuardBuilder::new()
            .with_store(store)
            .with_event_sink(events.clone())
            .build()
            .unwrap();
        let handle = guard
            .acquire("video_analysis", "v-1", LockPolicy::Exclusive, Duration::from_secs(30))
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        let heartbeat = Heartbeat::spawn(guard.clone(), handle, Duration::from_millis(10));
        for _ in 0..100 {
            if events.count("renewed") >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(events.count("renewed") >= 2);
        assert!(!heartbeat.is_lost());

        heartbeat.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let renewed = events.count("renewed");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.count("renewed"), renewed);
    }

    #[tokio::test]
    async fn heartbeat_reports_lost_lock() {
        let store = Arc::new(InMemoryTtlStore::default());
        let guard = GuardBuilder::new().with_store(store).build().unwrap();
        let handle = guard
            .acquire("video_analysis", "v-1", LockPolicy::Exclusive, Duration::from_secs(30))
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        guard
            .release(&handle, crate::domain::TerminalStatus::Failed)
            .await
            .unwrap();

        let mut heartbeat = Heartbeat::spawn(guard, handle, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(2), heartbeat.lost())
            .await
            .unwrap();
        assert!(heartbeat.is_lost());
    }
}
