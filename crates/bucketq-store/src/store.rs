use crate::Result;
use async_trait::async_trait;
use bucketq_core::{BucketIndex, BucketName, ItemId};
use std::time::Duration;

/// Key/value and set operations the deferred queue needs from its store.
///
/// Implementations are shared between tasks and processes; none of the
/// calls below hold state on the client side.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Read the bucket index of `key` from the `hash` index map.
    /// A missing entry reads as an empty index at version 0.
    async fn read_index(&self, hash: &str, key: &str) -> Result<BucketIndex>;

    /// Replace the bucket list of `key` if its index is still at `expected`.
    ///
    /// Returns the written index (at `expected + 1`) or `None` when another
    /// writer got there first.
    async fn swap_index(
        &self,
        hash: &str,
        key: &str,
        expected: u64,
        buckets: Vec<BucketName>,
    ) -> Result<Option<BucketIndex>>;

    /// Add ids to a bucket set, creating it if needed
    async fn add_members(&self, bucket: &BucketName, ids: &[ItemId]) -> Result<()>;

    /// All ids of a bucket set; a missing bucket is empty
    async fn members(&self, bucket: &BucketName) -> Result<Vec<ItemId>>;

    async fn cardinality(&self, bucket: &BucketName) -> Result<usize>;

    /// Delete keys of any type, returning how many existed
    async fn delete(&self, keys: &[&str]) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically increment a counter, returning the new value
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Delete `key` only while it still holds `value`
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;
}
