use crate::{BucketStore, Result, StoreError};
use async_trait::async_trait;
use bucketq_core::{BucketIndex, BucketName, ItemId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct Expiring {
    value: String,
    expires_at: Option<Instant>,
}

impl Expiring {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct State {
    indexes: HashMap<(String, String), BucketIndex>,
    sets: HashMap<String, HashSet<ItemId>>,
    strings: HashMap<String, Expiring>,
}

impl State {
    /// Drop `key` from the string map if its expiry has passed
    fn expire(&mut self, key: &str) {
        let now = Instant::now();
        if self.strings.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.strings.remove(key);
        }
    }
}

/// In-process store with the same semantics as the Redis backend.
///
/// Expiry follows the tokio clock, so tests running with paused time can
/// advance leases deterministically. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bucket sets currently held
    pub fn set_count(&self) -> usize {
        self.state.lock().sets.len()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn read_index(&self, hash: &str, key: &str) -> Result<BucketIndex> {
        let state = self.state.lock();
        Ok(state
            .indexes
            .get(&(hash.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn swap_index(
        &self,
        hash: &str,
        key: &str,
        expected: u64,
        buckets: Vec<BucketName>,
    ) -> Result<Option<BucketIndex>> {
        let mut state = self.state.lock();
        let slot = state
            .indexes
            .entry((hash.to_string(), key.to_string()))
            .or_default();

        if slot.version != expected {
            trace!("Index swap for {} rejected at version {}", key, slot.version);
            return Ok(None);
        }

        *slot = BucketIndex::new(expected + 1, buckets);
        Ok(Some(slot.clone()))
    }

    async fn add_members(&self, bucket: &BucketName, ids: &[ItemId]) -> Result<()> {
        let mut state = self.state.lock();
        if state.strings.contains_key(bucket.as_str()) {
            return Err(StoreError::WrongType(bucket.to_string()));
        }
        state
            .sets
            .entry(bucket.to_string())
            .or_default()
            .extend(ids.iter().copied());
        Ok(())
    }

    async fn members(&self, bucket: &BucketName) -> Result<Vec<ItemId>> {
        let state = self.state.lock();
        Ok(state
            .sets
            .get(bucket.as_str())
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn cardinality(&self, bucket: &BucketName) -> Result<usize> {
        let state = self.state.lock();
        Ok(state.sets.get(bucket.as_str()).map_or(0, HashSet::len))
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize> {
        let mut state = self.state.lock();
        let mut removed = 0;
        for key in keys {
            state.expire(key);
            if state.sets.remove(*key).is_some() || state.strings.remove(*key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.expire(key);
        Ok(state.sets.contains_key(key) || state.strings.contains_key(key))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.sets.remove(key);
        state.strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        state.expire(key);
        if state.sets.contains_key(key) {
            return Err(StoreError::WrongType(key.to_string()));
        }
        Ok(state.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut state = self.state.lock();
        state.expire(key);
        let entry = state.strings.entry(key.to_string()).or_insert(Expiring {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: u64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::WrongType(key.to_string()))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.expire(key);
        if state.strings.get(key).is_some_and(|entry| entry.value == value) {
            state.strings.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "QUEUES.BUCKETS";

    #[tokio::test]
    async fn test_swap_index_requires_current_version() {
        let store = MemoryStore::new();

        let written = store
            .swap_index(HASH, "posts", 0, vec!["a".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written.version, 1);

        let stale = store
            .swap_index(HASH, "posts", 0, vec!["b".into()])
            .await
            .unwrap();
        assert!(stale.is_none());

        let index = store.read_index(HASH, "posts").await.unwrap();
        assert_eq!(index.buckets, vec![BucketName::from("a")]);
        assert_eq!(index.version, 1);
    }

    #[tokio::test]
    async fn test_sets_deduplicate() {
        let store = MemoryStore::new();
        let bucket = BucketName::from("bucket");

        store.add_members(&bucket, &[1, 2]).await.unwrap();
        store.add_members(&bucket, &[2, 3]).await.unwrap();

        let mut members = store.members(&bucket).await.unwrap();
        members.sort_unstable();
        assert_eq!(members, vec![1, 2, 3]);
        assert_eq!(store.cardinality(&bucket).await.unwrap(), 3);

        assert_eq!(store.delete(&["bucket", "missing"]).await.unwrap(), 1);
        assert!(!store.exists("bucket").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiring_keys() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("lock", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.exists("lock").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.exists("lock").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_and_compare_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("fence").await.unwrap(), 1);
        assert_eq!(store.incr("fence").await.unwrap(), 2);

        store
            .set_with_expiry("lock", "2", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!store.delete_if_equals("lock", "1").await.unwrap());
        assert!(store.delete_if_equals("lock", "2").await.unwrap());
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.add_members(&"bucket".into(), &[1]).await.unwrap();
        assert!(matches!(
            store.get("bucket").await,
            Err(StoreError::WrongType(_))
        ));
    }
}
