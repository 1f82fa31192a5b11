//! TtlStore port - 期限付き Key-Value ストア（Redis または InMemory）
//!
//! The guard owns no storage. Every worker process reaches the same store, and
//! the whole protocol is built on these five calls.
//!
//! # 設計原則
//! - `set_if_absent` must be linearizable across all workers (it is the only
//!   source of mutual exclusion)
//! - compare-and-* calls are fenced by the `run_id` inside the stored value
//! - expired keys are invisible to every call

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RunId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Shared key-value store with atomic conditional writes and key expiry.
///
/// Values are opaque bytes to callers of this trait, but implementations must
/// be able to read the fencing `run_id` out of them
/// (see [`peek_run_id`](crate::domain::record::peek_run_id)).
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Write `value` only if `key` does not exist. Returns whether it was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete `key` only if its stored `run_id` equals `expected_run_id`.
    async fn compare_and_delete(
        &self,
        key: &str,
        expected_run_id: &RunId,
    ) -> Result<bool, StoreError>;

    /// Replace the value (and expiry) only if the stored `run_id` equals
    /// `expected_run_id`. `ttl = None` stores the value without expiry.
    async fn compare_and_update(
        &self,
        key: &str,
        expected_run_id: &RunId,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// All live entries whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}
