use crate::Result;
use bucketq_core::QueueKeys;
use bucketq_store::BucketStore;
use std::time::Duration;
use tracing::debug;

/// Time-bounded merge lock carrying a fencing token.
///
/// Acquisition never fails: a newer merger overwrites the marker with a
/// larger token, and the older one notices through [`MergeLease::is_held`]
/// before it commits.
#[derive(Debug, Clone)]
pub struct MergeLease {
    key: String,
    lock_key: String,
    token: u64,
}

impl MergeLease {
    pub async fn acquire(
        store: &dyn BucketStore,
        keys: &QueueKeys,
        key: &str,
        lease: Duration,
    ) -> Result<Self> {
        let token = store.incr(&keys.fence(key)).await?;
        let lock_key = keys.merge_lock(key);
        store
            .set_with_expiry(&lock_key, &token.to_string(), lease)
            .await?;

        debug!("Acquired merge lease for {} (token {})", key, token);

        Ok(MergeLease {
            key: key.to_string(),
            lock_key,
            token,
        })
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the marker still carries this lease's token
    pub async fn is_held(&self, store: &dyn BucketStore) -> Result<bool> {
        let current = store.get(&self.lock_key).await?;
        Ok(current.as_deref() == Some(self.token.to_string().as_str()))
    }

    /// Remove the marker unless another merger has since taken it over
    pub async fn release(self, store: &dyn BucketStore) -> Result<bool> {
        let released = store
            .delete_if_equals(&self.lock_key, &self.token.to_string())
            .await?;
        debug!("Released merge lease for {} (token {}): {}", self.key, self.token, released);
        Ok(released)
    }
}
