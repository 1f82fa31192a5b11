//! GuardedTask trait - 型付きのガード付きジョブ
//!
//! # ポイント
//! - Associated Constants (`const TYPE`, `const POLICY`)
//! - `async_trait` で async fn を trait に置く

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{LockHandle, LockPolicy, ResourceId};

/// A job that runs under the guard.
///
/// # 使用例
/// ```ignore
/// struct AnalyzeVideo { video_id: u64 }
///
/// #[async_trait]
/// impl GuardedTask for AnalyzeVideo {
///     const TYPE: &'static str = "video_analysis";
///     const POLICY: Option<LockPolicy> = Some(LockPolicy::Exclusive);
///     type Output = Report;
///     type Error = AnalysisError;
///
///     fn resource_id(&self) -> ResourceId { self.video_id.into() }
///
///     async fn run(self, handle: LockHandle) -> Result<Report, AnalysisError> { ... }
/// }
///
/// let outcome = guard.run_task(AnalyzeVideo { video_id: 7 }).await?;
/// ```
///
/// The policy actually used is the config entry for `TYPE` if there is one,
/// then `POLICY`, then the config default.
#[async_trait]
pub trait GuardedTask: Send + 'static {
    /// task_type（`:` を含めない）
    const TYPE: &'static str;

    const POLICY: Option<LockPolicy> = None;

    type Output: Send;
    type Error: Send;

    fn resource_id(&self) -> ResourceId;

    /// `None` uses the config's default TTL.
    fn ttl(&self) -> Option<Duration> {
        None
    }

    async fn run(self, handle: LockHandle) -> Result<Self::Output, Self::Error>;
}
