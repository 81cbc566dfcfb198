use crate::{config::MergerConfig, DeferredQueue, MergeReport, QueueError};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Background merger that consolidates a fixed set of queues on an interval
pub struct MergeScheduler {
    queue: Arc<DeferredQueue>,
    keys: Vec<String>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl MergeScheduler {
    pub fn new(queue: Arc<DeferredQueue>, config: &MergerConfig) -> Self {
        MergeScheduler {
            queue,
            keys: config.keys.clone(),
            interval: config.interval(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Merge every configured queue once, concurrently
    pub async fn merge_all(&self) -> Vec<(String, Result<MergeReport, QueueError>)> {
        let merges = self.keys.iter().map(|key| async move {
            let result = self.queue.merge(key).await;
            (key.clone(), result)
        });
        join_all(merges).await
    }

    /// Run until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) {
        info!(
            "Starting merger for {} queues every {:?}",
            self.keys.len(),
            self.interval
        );
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for (key, result) in self.merge_all().await {
                        match result {
                            Ok(report) => debug!("Merged {}: {:?}", key, report),
                            Err(QueueError::MergeLeaseLost { token, .. }) => {
                                warn!("Merge of {} lost its lease (token {})", key, token)
                            }
                            Err(e) => error!("Merge of {} failed: {}", key, e),
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutting down merger");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketq_store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_shutdown() {
        let queue = Arc::new(DeferredQueue::with_defaults(Arc::new(MemoryStore::new())).unwrap());
        queue.enqueue("posts", [1, 2]).await.unwrap();

        let config = MergerConfig {
            interval_secs: 10,
            keys: vec!["posts".to_string(), "images".to_string()],
        };
        let scheduler = Arc::new(MergeScheduler::new(queue.clone(), &config));

        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_secs(25)).await;
        scheduler.shutdown();
        handle.await.unwrap();

        // first tick fires immediately, then at 10s and 20s
        assert_eq!(queue.metrics().merge_count("merged"), 6);

        let checkout = queue.checkout("posts").await.unwrap();
        assert_eq!(checkout.content(), &[1, 2]);
    }
}
