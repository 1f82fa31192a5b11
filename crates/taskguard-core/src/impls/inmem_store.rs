//! InMemoryTtlStore - 開発・テスト用の TTL ストア
//!
//! # 実装詳細
//! - HashMap<String, Entry> を tokio の Mutex で排他制御
//!   （全操作が同じロックを通るので linearizable）
//! - 有効期限は Clock で判定（FixedClock で TTL 切れを再現できる）
//! - 障害注入: `set_offline` / `set_latency` で StoreUnavailable 系の経路をテスト
//!
//! 本番用の実装（Redis など）は別クレートに配置します。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::domain::RunId;
use crate::domain::record::peek_run_id;
use crate::ports::{Clock, StoreError, SystemClock, TtlStore};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }

    fn is_owned_by(&self, run_id: &RunId) -> bool {
        peek_run_id(&self.value).as_ref() == Some(run_id)
    }
}

/// In-process TTL store.
///
/// # 使用例
/// ```ignore
/// let clock = Arc::new(FixedClock::default());
/// let store = InMemoryTtlStore::new(clock.clone());
/// store.set_if_absent("k", bytes, Duration::from_secs(5)).await?;
/// clock.advance(Duration::from_secs(6)); // "k" is gone
/// ```
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryTtlStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails with a backend error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before touching the map.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store is offline".to_string()));
        }
        Ok(())
    }

    fn deadline(&self, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Drop `key` if it has expired, so the caller only sees live entries.
    fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
    }
}

impl Default for InMemoryTtlStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.enter().await?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now);

        if entries.contains_key(key) {
            return Ok(false);
        }
        let expires_at = Some(self.deadline(now, ttl));
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter().await?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected_run_id: &RunId,
    ) -> Result<bool, StoreError> {
        self.enter().await?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now);

        match entries.get(key) {
            Some(entry) if entry.is_owned_by(expected_run_id) => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_update(
        &self,
        key: &str,
        expected_run_id: &RunId,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.enter().await?;
        let now = self.clock.now();
        let expires_at = ttl.map(|ttl| self.deadline(now, ttl));
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) if entry.is_owned_by(expected_run_id) => {
                *entry = Entry { value, expires_at };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.enter().await?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.is_live(now));

        let mut found: Vec<(String, Vec<u8>)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use ulid::Ulid;

    fn value_for(run_id: &RunId) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "run_id": run_id })).unwrap()
    }

    fn new_store() -> (Arc<FixedClock>, InMemoryTtlStore) {
        let clock = Arc::new(FixedClock::default());
        let store = InMemoryTtlStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let (_, store) = new_store();
        let a = RunId::from_ulid(Ulid::new());
        let b = RunId::from_ulid(Ulid::new());

        assert!(store.set_if_absent("k", value_for(&a), Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("k", value_for(&b), Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(value_for(&a)));
    }

    #[tokio::test]
    async fn keys_expire_with_the_clock() {
        let (clock, store) = new_store();
        let a = RunId::from_ulid(Ulid::new());
        store.set_if_absent("k", value_for(&a), Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(4));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn compare_and_delete_checks_the_fence() {
        let (_, store) = new_store();
        let owner = RunId::from_ulid(Ulid::new());
        let intruder = RunId::from_ulid(Ulid::new());
        store.set_if_absent("k", value_for(&owner), Duration::from_secs(5)).await.unwrap();

        assert!(!store.compare_and_delete("k", &intruder).await.unwrap());
        assert!(store.compare_and_delete("k", &owner).await.unwrap());
        assert!(!store.compare_and_delete("k", &owner).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_update_extends_or_clears_expiry() {
        let (clock, store) = new_store();
        let owner = RunId::from_ulid(Ulid::new());
        store.set_if_absent("k", value_for(&owner), Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(4));
        assert!(store
            .compare_and_update("k", &owner, value_for(&owner), Some(Duration::from_secs(5)))
            .await
            .unwrap());
        clock.advance(Duration::from_secs(4));
        assert!(store.get("k").await.unwrap().is_some());

        // None = 期限なし
        assert!(store
            .compare_and_update("k", &owner, value_for(&owner), None)
            .await
            .unwrap());
        clock.advance(Duration::from_secs(86_400));
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn compare_and_update_rejects_other_owners_and_missing_keys() {
        let (_, store) = new_store();
        let owner = RunId::from_ulid(Ulid::new());
        let other = RunId::from_ulid(Ulid::new());

        assert!(!store
            .compare_and_update("k", &owner, value_for(&owner), None)
            .await
            .unwrap());

        store.set_if_absent("k", value_for(&owner), Duration::from_secs(5)).await.unwrap();
        assert!(!store
            .compare_and_update("k", &other, value_for(&other), None)
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(value_for(&owner)));
    }

    #[tokio::test]
    async fn scan_filters_by_prefix_and_skips_expired() {
        let (clock, store) = new_store();
        let id = RunId::from_ulid(Ulid::new());
        store.set_if_absent("guard:a:1", value_for(&id), Duration::from_secs(5)).await.unwrap();
        store.set_if_absent("guard:b:2", value_for(&id), Duration::from_secs(50)).await.unwrap();
        store.set_if_absent("other:c:3", value_for(&id), Duration::from_secs(50)).await.unwrap();

        let keys: Vec<String> = store.scan("guard:").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["guard:a:1".to_string(), "guard:b:2".to_string()]);

        clock.advance(Duration::from_secs(10));
        let keys: Vec<String> = store.scan("guard:").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["guard:b:2".to_string()]);
    }

    #[tokio::test]
    async fn oversized_latency_saturates_instead_of_wrapping() {
        let (_, store) = new_store();
        // 2^64 + 384 ms: truncation would leave a 384ms delay
        store.set_latency(Duration::from_secs(u64::MAX / 1_000 + 1));

        let call = tokio::time::timeout(Duration::from_secs(1), store.get("k")).await;
        assert!(call.is_err());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let (_, store) = new_store();
        store.set_offline(true);
        assert!(matches!(store.get("k").await, Err(StoreError::Backend(_))));
        assert!(store.scan("").await.is_err());

        store.set_offline(false);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
