//! ReclaimerLoop - Reclaimer を定期実行するバックグラウンドタスク
//!
//! - `shutdown_tx` に true を送るとループが止まる（実行中のパスは最後まで走る）
//! - `shutdown_and_join()` で終了を待てる

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app::reclaimer::Reclaimer;

pub struct ReclaimerLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReclaimerLoop {
    /// Run `reclaim(max_age)` every `interval`, starting immediately.
    pub fn spawn(reclaimer: Reclaimer, interval: Duration, max_age: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            reclaim_loop(reclaimer, interval, max_age, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "reclaimer loop ended abnormally");
        }
    }
}

async fn reclaim_loop(
    reclaimer: Reclaimer,
    interval: Duration,
    max_age: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped = 停止
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match reclaimer.reclaim(max_age).await {
            Ok(report) if report.is_quiet() => {
                tracing::trace!(scanned = report.scanned, "reclaim pass: nothing to do");
            }
            Ok(report) => {
                tracing::info!(
                    scanned = report.scanned,
                    reclaimed = report.reclaimed.len(),
                    purged = report.purged.len(),
                    skipped = report.skipped,
                    errors = report.errors,
                    "reclaim pass finished"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "reclaim pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::GuardBuilder;
    use crate::domain::{LockKey, LockPolicy, LockRecord, RunId};
    use crate::impls::{InMemoryTtlStore, RecordingEventSink};
    use crate::ports::{Clock, FixedClock, TtlStore};
    use ulid::Ulid;

    #[tokio::test]
    async fn loop_reclaims_and_stops_on_shutdown() {
        let clock = Arc::new(FixedClock::default());
        let store = Arc::new(InMemoryTtlStore::new(clock.clone()));
        let events = Arc::new(RecordingEventSink::new());
        let guard = GuardBuilder::new()
            .with_store(store.clone())
            .with_clock(clock.clone())
            .with_event_sink(events.clone())
            .build()
            .unwrap();

        let key = LockKey::parse("video_analysis", "v-1").unwrap();
        let record = LockRecord::running(
            &key,
            RunId::from_ulid(Ulid::new()),
            LockPolicy::Exclusive,
            Duration::from_secs(5),
            clock.now(),
        );
        store
            .set_if_absent(
                &key.store_key(guard.namespace()),
                record.encode().unwrap(),
                Duration::from_secs(3_600),
            )
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));

        let reclaim = ReclaimerLoop::spawn(
            guard.reclaimer(),
            Duration::from_millis(10),
            Duration::from_secs(30),
        );

        for _ in 0..100 {
            if events.count("reclaimed") > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        reclaim.shutdown_and_join().await;

        assert_eq!(events.count("reclaimed"), 1);
        assert!(store.is_empty().await);
    }
}
