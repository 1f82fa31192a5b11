use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

use taskguard_core::app::{BuildError, LockCounts};
use taskguard_core::domain::{LockHandle, ResourceId};
use taskguard_core::impls::InMemoryTtlStore;
use taskguard_core::ports::FixedClock;
use taskguard_core::typed::GuardedTask;
use taskguard_core::{
    Guard, GuardBuilder, GuardConfig, GuardError, LockPolicy, Outcome, TerminalStatus,
};

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] taskguard_core::config::ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("failed to print status: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("analysis of video {video_id} failed: {reason}")]
struct AnalysisError {
    video_id: u64,
    reason: String,
}

/// 動画解析ジョブ（EXCLUSIVE: 一度完了したら再実行しない）
struct AnalyzeVideo {
    video_id: u64,
}

#[async_trait]
impl GuardedTask for AnalyzeVideo {
    const TYPE: &'static str = "video";
    const POLICY: Option<LockPolicy> = Some(LockPolicy::Exclusive);
    type Output = usize;
    type Error = AnalysisError;

    fn resource_id(&self) -> ResourceId {
        self.video_id.into()
    }

    async fn run(self, handle: LockHandle) -> Result<usize, AnalysisError> {
        if self.video_id == 0 {
            return Err(AnalysisError {
                video_id: self.video_id,
                reason: "no such video".to_string(),
            });
        }
        tracing::info!(key = %handle.key(), run_id = %handle.run_id(), "analyzing");
        Ok(24 * 60)
    }
}

/// One line of demo output.
#[derive(Debug, Serialize)]
struct ScenarioLine<'a> {
    scenario: &'a str,
    call: usize,
    outcome: String,
}

fn describe<T: std::fmt::Debug, E: std::fmt::Display>(outcome: &Outcome<T, E>) -> String {
    match outcome {
        Outcome::Completed(value) => format!("COMPLETED({value:?})"),
        Outcome::Failed(err) => format!("FAILED({err})"),
        Outcome::Rejected(reason) => format!("REJECTED({reason})"),
    }
}

fn report<T: std::fmt::Debug, E: std::fmt::Display>(
    scenario: &str,
    call: usize,
    outcome: &Outcome<T, E>,
) -> Result<(), DemoError> {
    let line = ScenarioLine {
        scenario,
        call,
        outcome: describe(outcome),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

/// A: CONCURRENT_GUARD は完了後も再実行できる
async fn scenario_a(guard: &Guard) -> Result<(), DemoError> {
    for call in 1..=2 {
        let outcome = guard
            .run_guarded(
                "profiling",
                "ds-1",
                LockPolicy::ConcurrentGuard,
                Duration::from_secs(60),
                |_h| async { Ok::<_, String>("profiled") },
            )
            .await?;
        report("A", call, &outcome)?;
    }
    Ok(())
}

/// B: EXCLUSIVE は二回目を AlreadyCompleted で拒否する
async fn scenario_b(guard: &Guard) -> Result<(), DemoError> {
    for call in 1..=2 {
        let outcome = guard.run_task(AnalyzeVideo { video_id: 7 }).await?;
        report("B", call, &outcome)?;
    }
    Ok(())
}

/// C: 同時に二つ走らせると片方だけが実行される
async fn scenario_c(guard: &Guard) -> Result<(), DemoError> {
    let slow = |_h: LockHandle| async {
        sleep(Duration::from_millis(300)).await;
        Ok::<_, String>(())
    };
    let (first, second) = tokio::join!(
        guard.run_guarded("profiling", "ds-2", LockPolicy::ConcurrentGuard, Duration::from_secs(60), slow),
        guard.run_guarded("profiling", "ds-2", LockPolicy::ConcurrentGuard, Duration::from_secs(60), slow),
    );
    report("C", 1, &first?)?;
    report("C", 2, &second?)?;
    Ok(())
}

/// D: クラッシュした holder は TTL 切れで解放される
async fn scenario_d(guard: &Guard, clock: &FixedClock) -> Result<(), DemoError> {
    let ttl = Duration::from_secs(5);
    let crashed = guard
        .acquire("video", 8u64, LockPolicy::Exclusive, ttl)
        .await?
        .into_handle();
    tracing::info!(acquired = crashed.is_some(), "holder acquired and then crashed");

    clock.advance(Duration::from_secs(6));
    let outcome = guard
        .run_guarded("video", 8u64, LockPolicy::Exclusive, ttl, |_h| async {
            Ok::<_, String>("recovered")
        })
        .await?;
    report("D", 1, &outcome)?;

    if let Some(crashed) = crashed {
        // 古い holder はもう何も書けない
        let lost = guard.renew(&crashed).await.err().is_some_and(|e| e.is_lock_lost());
        let release = guard.release(&crashed, TerminalStatus::Completed).await?;
        tracing::info!(lost, ?release, "old holder came back");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 引数があれば JSON の設定ファイルとして読む
    let config = match std::env::args().nth(1) {
        Some(path) => GuardConfig::from_path(path)?,
        None => GuardConfig::default().with_policy("video", LockPolicy::Exclusive),
    };

    let clock = Arc::new(FixedClock::default());
    let store = Arc::new(InMemoryTtlStore::new(clock.clone()));
    let guard = GuardBuilder::new()
        .with_store(store)
        .with_clock(clock.clone())
        .with_config(config)
        .expect_policies(&[AnalyzeVideo::TYPE])
        .build()?;

    scenario_a(&guard).await?;
    scenario_b(&guard).await?;
    scenario_c(&guard).await?;
    scenario_d(&guard, &clock).await?;

    let failed = guard.run_task(AnalyzeVideo { video_id: 0 }).await?;
    report("failure", 1, &failed)?;

    let snapshots = guard.list().await?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    println!("{}", serde_json::to_string(&LockCounts::tally(&snapshots))?);

    let reclaimed = guard
        .reclaimer()
        .reclaim(guard.config().reclaim_max_age())
        .await?;
    println!("{}", serde_json::to_string(&reclaimed)?);

    Ok(())
}
