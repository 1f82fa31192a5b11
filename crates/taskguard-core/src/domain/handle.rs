//! LockHandle - proof of ownership for one run.

use std::time::Duration;

use super::ids::RunId;
use super::key::LockKey;
use super::state::LockPolicy;

/// Handed out by a successful `acquire`.
///
/// Every state-changing call made with the handle is fenced by `run_id`: once
/// another acquisition claims the key, the handle can no longer mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: LockKey,
    store_key: String,
    run_id: RunId,
    policy: LockPolicy,
    ttl: Duration,
}

impl LockHandle {
    pub fn new(
        key: LockKey,
        store_key: String,
        run_id: RunId,
        policy: LockPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            store_key,
            run_id,
            policy,
            ttl,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Namespaced key in the store.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
