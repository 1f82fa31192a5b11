//! taskguard-core
//!
//! Distributed execution guard for long-running jobs keyed by
//! `(task_type, resource_id)`. Any number of processes share one TTL key-value
//! store; at most one of them runs a given job at a time, and an abandoned run
//! never blocks the job forever.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, key, record, state, outcome, handle, errors, events）
//! - **ports**: 抽象化レイヤー（TtlStore, Clock, IdGenerator, EventSink）
//! - **app**: ロックプロトコル（builder, guard, heartbeat, reclaimer, status）
//! - **typed**: 型付き GuardedTask API
//! - **impls**: 実装（InMemoryTtlStore, TracingEventSink など開発用）
//! - **config**: GuardConfig（JSON）
//!
//! # 使用例
//! ```ignore
//! let guard = GuardBuilder::new()
//!     .with_store(Arc::new(InMemoryTtlStore::default()))
//!     .build()?;
//!
//! let outcome = guard
//!     .run_guarded("video_analysis", 42u64, LockPolicy::Exclusive, ttl, |handle| async move {
//!         analyze(handle).await
//!     })
//!     .await?;
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use self::app::{Guard, GuardBuilder};
pub use self::config::GuardConfig;
pub use self::domain::{
    Acquisition, GuardError, LockHandle, LockPolicy, LockStatus, Outcome, RejectReason,
    ReleaseOutcome, TerminalStatus,
};
