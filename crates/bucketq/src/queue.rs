use crate::{
    checkout::Checkout, config::MergeConfig, lease::MergeLease, metrics::QueueMetrics,
    QueueConfig, QueueError, Result,
};
use bucketq_core::{BucketIndex, BucketName, ItemId, QueueIds, QueueKeys};
use bucketq_store::BucketStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub key: String,
    /// Buckets drained into the new active bucket
    pub buckets_merged: usize,
    /// Distinct ids carried over
    pub items: usize,
    pub token: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSummary {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size: usize,
}

/// Point-in-time view of a queue, for inspection tooling
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub key: String,
    pub version: u64,
    pub merging: bool,
    pub buckets: Vec<BucketSummary>,
}

impl QueueSnapshot {
    /// Sum of bucket sizes; ids present in several buckets count once per bucket
    pub fn pending(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.size).sum()
    }
}

/// Deferred batching queue over a shared bucket store.
///
/// Producers [`enqueue`](Self::enqueue) ids, a consumer periodically
/// [`checkout`](Self::checkout)s everything pending and commits once the
/// batch is processed, and [`merge`](Self::merge) folds fragment buckets
/// left by overlapping checkouts back into one.
pub struct DeferredQueue {
    store: Arc<dyn BucketStore>,
    keys: QueueKeys,
    options: MergeConfig,
    metrics: Arc<QueueMetrics>,
}

impl DeferredQueue {
    pub fn new(store: Arc<dyn BucketStore>, config: &QueueConfig) -> Result<Self> {
        Ok(DeferredQueue {
            store,
            keys: QueueKeys::new(config.store.key_prefix.clone()),
            options: config.merge.clone(),
            metrics: Arc::new(QueueMetrics::new()?),
        })
    }

    pub fn with_defaults(store: Arc<dyn BucketStore>) -> Result<Self> {
        Self::new(store, &QueueConfig::default())
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Add ids to the active bucket of `key`, creating one if the queue has none.
    ///
    /// If a checkout rotates the active bucket while the ids are being
    /// written, they are written again to the new active bucket, so an id
    /// may be delivered twice but is never dropped.
    pub async fn enqueue(&self, key: &str, ids: impl Into<QueueIds>) -> Result<()> {
        QueueKeys::validate(key)?;
        let ids = ids.into();
        if ids.is_empty() {
            return Ok(());
        }

        let hash = self.keys.index();
        let mut index = self.store.read_index(hash, key).await?;
        let mut attempts = 0;

        loop {
            let target = match index.active() {
                Some(bucket) => bucket.clone(),
                None => {
                    let bucket = BucketName::generate(&self.keys, key);
                    match self
                        .store
                        .swap_index(hash, key, index.version, vec![bucket.clone()])
                        .await?
                    {
                        Some(written) => {
                            debug!("Created bucket {} for empty queue {}", bucket, key);
                            index = written;
                            bucket
                        }
                        None => {
                            self.conflict(key, &mut attempts)?;
                            index = self.store.read_index(hash, key).await?;
                            continue;
                        }
                    }
                }
            };

            self.store.add_members(&target, ids.as_slice()).await?;

            let current = self.store.read_index(hash, key).await?;
            if current.version == index.version || current.active() == Some(&target) {
                break;
            }

            debug!(
                "Active bucket of {} rotated during enqueue, rewriting {} ids",
                key,
                ids.len()
            );
            if !current.contains(&target) {
                // already committed away; the write above recreated an orphan set
                self.store.delete(&[target.as_str()]).await?;
            }
            self.metrics.enqueue_rewrites.inc();
            self.bump(key, &mut attempts)?;
            index = current;
        }

        self.metrics.items_enqueued.inc_by(ids.len() as u64);
        debug!("Enqueued {} ids to {}", ids.len(), key);
        Ok(())
    }

    /// Claim every id pending for `key`.
    ///
    /// Waits for a running merge first. A fresh active bucket is pushed to
    /// the index front before the previous buckets are drained, so ids
    /// enqueued from here on go to the next checkout instead.
    pub async fn checkout(&self, key: &str) -> Result<Checkout> {
        QueueKeys::validate(key)?;
        self.wait_for_merge(key).await?;
        self.checkout_buckets(key).await
    }

    /// Checkout without waiting on the merge lock; only merges call this
    async fn checkout_buckets(&self, key: &str) -> Result<Checkout> {
        let hash = self.keys.index();
        let mut attempts = 0;

        let snapshot = loop {
            let index = self.store.read_index(hash, key).await?;
            let fresh = BucketName::generate(&self.keys, key);
            let pushed = index.with_front(fresh);

            if self
                .store
                .swap_index(hash, key, index.version, pushed)
                .await?
                .is_some()
            {
                break index.buckets;
            }
            self.conflict(key, &mut attempts)?;
        };

        let mut content = BTreeSet::new();
        for bucket in &snapshot {
            content.extend(self.store.members(bucket).await?);
        }
        let content: Vec<ItemId> = content.into_iter().collect();

        self.metrics.checkouts.inc();
        self.metrics.items_checked_out.inc_by(content.len() as u64);
        debug!(
            "Checked out {} ids from {} buckets of {}",
            content.len(),
            snapshot.len(),
            key
        );

        Ok(Checkout {
            store: self.store.clone(),
            keys: self.keys.clone(),
            key: key.to_string(),
            snapshot,
            content,
            max_cas_retries: self.options.max_cas_retries,
            metrics: self.metrics.clone(),
        })
    }

    /// Consolidate all buckets of `key` into the active one under a merge lease.
    pub async fn merge(&self, key: &str) -> Result<MergeReport> {
        QueueKeys::validate(key)?;
        let lease =
            MergeLease::acquire(self.store.as_ref(), &self.keys, key, self.options.lease()).await?;

        let result = self.merge_under(key, &lease).await;
        match &result {
            Ok(_) => self.metrics.inc_merges("merged"),
            Err(QueueError::MergeLeaseLost { .. }) => self.metrics.inc_merges("lease_lost"),
            Err(_) => self.metrics.inc_merges("failed"),
        }

        match lease.release(self.store.as_ref()).await {
            Ok(true) => {}
            Ok(false) => warn!("Merge lease for {} was taken over before release", key),
            Err(e) if result.is_ok() => return Err(e),
            Err(e) => warn!("Failed to release merge lease for {}: {}", key, e),
        }

        result
    }

    async fn merge_under(&self, key: &str, lease: &MergeLease) -> Result<MergeReport> {
        let checkout = self.checkout_buckets(key).await?;
        if !checkout.is_empty() {
            self.enqueue(key, checkout.content()).await?;
        }

        if !lease.is_held(self.store.as_ref()).await? {
            warn!(
                "Merge lease for {} expired or was taken over (token {}), leaving buckets in place",
                key,
                lease.token()
            );
            return Err(QueueError::MergeLeaseLost {
                key: key.to_string(),
                token: lease.token(),
            });
        }

        let report = MergeReport {
            key: key.to_string(),
            buckets_merged: checkout.snapshot().len(),
            items: checkout.content().len(),
            token: lease.token(),
        };
        checkout.commit().await?;

        info!(
            "Merged {} buckets of {} ({} ids)",
            report.buckets_merged, key, report.items
        );
        Ok(report)
    }

    /// Block while a merge lease is held for `key`.
    ///
    /// Polls with exponential backoff between the configured bounds and
    /// gives up after `max_wait` if one is set.
    async fn wait_for_merge(&self, key: &str) -> Result<()> {
        let lock_key = self.keys.merge_lock(key);
        if !self.store.exists(&lock_key).await? {
            return Ok(());
        }

        debug!("Queue {} is merging, waiting", key);
        let started = Instant::now();
        let mut delay = self.options.poll_initial();

        loop {
            if let Some(max_wait) = self.options.max_wait() {
                let waited = started.elapsed();
                if waited >= max_wait {
                    warn!("Gave up waiting for merge of {} after {:?}", key, waited);
                    return Err(QueueError::MergeWaitTimeout {
                        key: key.to_string(),
                        waited,
                    });
                }
                delay = delay.min(max_wait - waited);
            }

            tokio::time::sleep(delay).await;

            if !self.store.exists(&lock_key).await? {
                self.metrics
                    .merge_wait_seconds
                    .observe(started.elapsed().as_secs_f64());
                return Ok(());
            }
            delay = (delay * 2).min(self.options.poll_max());
        }
    }

    /// Current index and bucket sizes of `key`
    pub async fn inspect(&self, key: &str) -> Result<QueueSnapshot> {
        QueueKeys::validate(key)?;
        let index: BucketIndex = self.store.read_index(self.keys.index(), key).await?;
        let merging = self.store.exists(&self.keys.merge_lock(key)).await?;

        let mut buckets = Vec::with_capacity(index.len());
        for bucket in &index.buckets {
            buckets.push(BucketSummary {
                name: bucket.to_string(),
                created_at: bucket.created_at(),
                size: self.store.cardinality(bucket).await?,
            });
        }

        Ok(QueueSnapshot {
            key: key.to_string(),
            version: index.version,
            merging,
            buckets,
        })
    }

    fn conflict(&self, key: &str, attempts: &mut u32) -> Result<()> {
        self.metrics.index_conflicts.inc();
        self.bump(key, attempts)
    }

    /// Count one more attempt at changing the index of `key`
    fn bump(&self, key: &str, attempts: &mut u32) -> Result<()> {
        *attempts += 1;
        if *attempts >= self.options.max_cas_retries {
            warn!("Bucket index of {} still contended after {} attempts", key, attempts);
            return Err(QueueError::IndexContention {
                key: key.to_string(),
                attempts: *attempts,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketq_store::MemoryStore;
    use std::time::Duration;

    fn queue() -> (DeferredQueue, MemoryStore) {
        let store = MemoryStore::new();
        let queue = DeferredQueue::with_defaults(Arc::new(store.clone())).unwrap();
        (queue, store)
    }

    #[tokio::test]
    async fn test_checkout_returns_enqueued_then_nothing() {
        let (queue, _) = queue();
        queue.enqueue("k", vec![1, 2, 3]).await.unwrap();

        let checkout = queue.checkout("k").await.unwrap();
        assert_eq!(checkout.content(), &[1, 2, 3]);
        checkout.commit().await.unwrap();

        let again = queue.checkout("k").await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_deduplicates() {
        let (queue, _) = queue();
        queue.enqueue("k", vec![1, 2]).await.unwrap();
        queue.enqueue("k", vec![2, 3]).await.unwrap();

        let checkout = queue.checkout("k").await.unwrap();
        assert_eq!(checkout.content(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_enqueue_touches_nothing() {
        let (queue, store) = queue();
        queue.enqueue("k", Vec::<ItemId>::new()).await.unwrap();

        let snapshot = queue.inspect("k").await.unwrap();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.buckets.is_empty());
        assert_eq!(store.set_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let (queue, _) = queue();
        assert!(matches!(
            queue.enqueue("", 1).await,
            Err(QueueError::CoreError(_))
        ));
    }

    #[tokio::test]
    async fn test_inspect_reports_buckets() {
        let (queue, _) = queue();
        queue.enqueue("k", [5, 6]).await.unwrap();

        let snapshot = queue.inspect("k").await.unwrap();
        assert_eq!(snapshot.buckets.len(), 1);
        assert_eq!(snapshot.pending(), 2);
        assert!(snapshot.buckets[0].created_at.is_some());
        assert!(!snapshot.merging);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_max_wait() {
        let store = MemoryStore::new();
        let mut config = QueueConfig::default();
        config.merge.max_wait_secs = Some(5);
        let queue = DeferredQueue::new(Arc::new(store.clone()), &config).unwrap();

        store
            .set_with_expiry(&queue.keys().merge_lock("k"), "1", Duration::from_secs(60))
            .await
            .unwrap();

        let err = queue.checkout("k").await.unwrap_err();
        match err {
            QueueError::MergeWaitTimeout { key, waited } => {
                assert_eq!(key, "k");
                assert!(waited >= Duration::from_secs(5));
                assert!(waited < Duration::from_secs(6));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_merge_counts_outcome() {
        let (queue, _) = queue();
        queue.enqueue("k", 1).await.unwrap();
        queue.merge("k").await.unwrap();
        assert_eq!(queue.metrics().merge_count("merged"), 1);
        assert_eq!(queue.metrics().items_enqueued.get(), 2);
    }
}
