use crate::{metrics::QueueMetrics, QueueError, Result};
use bucketq_core::{BucketName, ItemId, QueueKeys};
use bucketq_store::BucketStore;
use std::sync::Arc;
use tracing::debug;

/// Ids claimed by a checkout, plus the handle that releases their buckets.
///
/// Dropping a checkout without committing leaves its buckets indexed; their
/// ids are returned again by the next checkout.
#[must_use = "a checkout's buckets stay queued until it is committed"]
pub struct Checkout {
    pub(crate) store: Arc<dyn BucketStore>,
    pub(crate) keys: QueueKeys,
    pub(crate) key: String,
    pub(crate) snapshot: Vec<BucketName>,
    pub(crate) content: Vec<ItemId>,
    pub(crate) max_cas_retries: u32,
    pub(crate) metrics: Arc<QueueMetrics>,
}

impl Checkout {
    /// Distinct ids drained from the snapshot buckets, ascending
    pub fn content(&self) -> &[ItemId] {
        &self.content
    }

    pub fn into_content(self) -> Vec<ItemId> {
        self.content
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Buckets this checkout drained and will remove on commit
    pub fn snapshot(&self) -> &[BucketName] {
        &self.snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Remove the drained buckets from the index and delete their sets.
    ///
    /// Removal is by name, so buckets created after the snapshot survive and
    /// buckets another committer already removed are simply skipped.
    pub async fn commit(self) -> Result<()> {
        let hash = self.keys.index();
        let mut attempts = 0;

        loop {
            let index = self.store.read_index(hash, &self.key).await?;
            let remaining = index.without(&self.snapshot);
            if remaining.len() == index.len() {
                break;
            }

            if self
                .store
                .swap_index(hash, &self.key, index.version, remaining)
                .await?
                .is_some()
            {
                break;
            }

            self.metrics.index_conflicts.inc();
            attempts += 1;
            if attempts >= self.max_cas_retries {
                return Err(QueueError::IndexContention {
                    key: self.key.clone(),
                    attempts,
                });
            }
        }

        if !self.snapshot.is_empty() {
            let names: Vec<&str> = self.snapshot.iter().map(BucketName::as_str).collect();
            self.store.delete(&names).await?;
        }

        self.metrics.commits.inc();
        debug!(
            "Committed checkout of {} ({} buckets released)",
            self.key,
            self.snapshot.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout")
            .field("key", &self.key)
            .field("snapshot", &self.snapshot)
            .field("content", &self.content)
            .finish()
    }
}
