use crate::{BucketStore, Result};
use async_trait::async_trait;
use bucketq_core::{BucketIndex, BucketName, ItemId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, info};

/// Compare-and-swap on the `version` field of an index record.
/// Records without a version (bare lists) count as version 0.
const SWAP_INDEX_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
local version = 0
if raw then
  local ok, decoded = pcall(cjson.decode, raw)
  if ok and type(decoded) == 'table' and decoded['version'] ~= nil then
    version = tonumber(decoded['version'])
  end
end
if version ~= tonumber(ARGV[2]) then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
"#;

const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    swap_index: Script,
    delete_if_equals: Script,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!("Connected to redis at {}", url);

        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> Self {
        RedisStore {
            conn,
            swap_index: Script::new(SWAP_INDEX_SCRIPT),
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
        }
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn read_index(&self, hash: &str, key: &str) -> Result<BucketIndex> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(hash, key).await?;
        match raw {
            Some(raw) => Ok(BucketIndex::from_json(&raw)?),
            None => Ok(BucketIndex::default()),
        }
    }

    async fn swap_index(
        &self,
        hash: &str,
        key: &str,
        expected: u64,
        buckets: Vec<BucketName>,
    ) -> Result<Option<BucketIndex>> {
        let mut conn = self.conn.clone();
        let next = BucketIndex::new(expected + 1, buckets);
        let record = next.to_json()?;

        let swapped: i32 = self
            .swap_index
            .key(hash)
            .arg(key)
            .arg(expected)
            .arg(record)
            .invoke_async(&mut conn)
            .await?;

        if swapped == 1 {
            Ok(Some(next))
        } else {
            debug!("Index swap for {} rejected, expected version {}", key, expected);
            Ok(None)
        }
    }

    async fn add_members(&self, bucket: &BucketName, ids: &[ItemId]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn.sadd(bucket.as_str(), ids).await?;
        Ok(())
    }

    async fn members(&self, bucket: &BucketName) -> Result<Vec<ItemId>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(bucket.as_str()).await?)
    }

    async fn cardinality(&self, bucket: &BucketName) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.scard(bucket.as_str()).await?)
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1u64).await?)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i32 = self
            .delete_if_equals
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    // Run with `BQ_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    async fn connect() -> Option<(RedisStore, ConnectionManager)> {
        let url = std::env::var("BQ_REDIS_URL").ok()?;
        let client = redis::Client::open(url.as_str()).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        Some((RedisStore::with_connection(conn.clone()), conn))
    }

    fn scratch(name: &str) -> String {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        format!("bq-test:{}:{}", name, nanos)
    }

    #[tokio::test]
    #[ignore]
    async fn test_stale_swap_is_rejected() {
        let Some((store, mut conn)) = connect().await else { return };
        let hash = scratch("stale");

        let written = store
            .swap_index(&hash, "posts", 0, vec![BucketName::from("a")])
            .await
            .unwrap();
        assert_eq!(written.map(|index| index.version), Some(1));

        let stale = store
            .swap_index(&hash, "posts", 0, vec![BucketName::from("b")])
            .await
            .unwrap();
        assert!(stale.is_none());

        let index = store.read_index(&hash, "posts").await.unwrap();
        assert_eq!(index.version, 1);
        assert_eq!(index.buckets, vec![BucketName::from("a")]);

        let _: () = conn.del(&hash).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_legacy_list_swaps_at_version_zero() {
        let Some((store, mut conn)) = connect().await else { return };
        let hash = scratch("legacy");

        let _: () = redis::cmd("HSET")
            .arg(&hash)
            .arg("posts")
            .arg(r#"["x"]"#)
            .query_async(&mut conn)
            .await
            .unwrap();

        let index = store.read_index(&hash, "posts").await.unwrap();
        assert_eq!(index.version, 0);
        assert_eq!(index.buckets, vec![BucketName::from("x")]);

        let written = store
            .swap_index(&hash, "posts", 0, vec![BucketName::from("y")])
            .await
            .unwrap();
        assert!(written.is_some());

        let index = store.read_index(&hash, "posts").await.unwrap();
        assert_eq!(index.version, 1);
        assert_eq!(index.buckets, vec![BucketName::from("y")]);

        let _: () = conn.del(&hash).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_delete_if_equals_keeps_other_values() {
        let Some((store, _conn)) = connect().await else { return };
        let key = scratch("lock");

        store
            .set_with_expiry(&key, "7", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!store.delete_if_equals(&key, "6").await.unwrap());
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("7"));

        assert!(store.delete_if_equals(&key, "7").await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
    }
}
