use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus metrics for the deferred queue
pub struct QueueMetrics {
    pub registry: Registry,

    // Item flow
    pub items_enqueued: IntCounter,
    pub items_checked_out: IntCounter,

    // Checkout lifecycle
    pub checkouts: IntCounter,
    pub commits: IntCounter,

    // Merges by outcome (merged, lease_lost, failed)
    pub merges: IntCounterVec,

    // Time spent waiting for a merge lease to clear
    pub merge_wait_seconds: Histogram,

    // Rejected index swaps
    pub index_conflicts: IntCounter,

    // Enqueues repeated because the active bucket rotated underneath them
    pub enqueue_rewrites: IntCounter,
}

impl QueueMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let items_enqueued = IntCounter::new("bq_items_enqueued_total", "Ids handed to enqueue")?;
        registry.register(Box::new(items_enqueued.clone()))?;

        let items_checked_out =
            IntCounter::new("bq_items_checked_out_total", "Distinct ids returned by checkouts")?;
        registry.register(Box::new(items_checked_out.clone()))?;

        let checkouts = IntCounter::new("bq_checkouts_total", "Number of checkouts")?;
        registry.register(Box::new(checkouts.clone()))?;

        let commits = IntCounter::new("bq_commits_total", "Number of committed checkouts")?;
        registry.register(Box::new(commits.clone()))?;

        let merges = IntCounterVec::new(
            Opts::new("bq_merges_total", "Merges by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(merges.clone()))?;

        let merge_wait_seconds = Histogram::with_opts(HistogramOpts::new(
            "bq_merge_wait_seconds",
            "Time checkouts spent waiting for a merge to finish",
        ))?;
        registry.register(Box::new(merge_wait_seconds.clone()))?;

        let index_conflicts =
            IntCounter::new("bq_index_conflicts_total", "Bucket index swaps lost to a concurrent writer")?;
        registry.register(Box::new(index_conflicts.clone()))?;

        let enqueue_rewrites = IntCounter::new(
            "bq_enqueue_rewrites_total",
            "Enqueues rewritten to a new active bucket after a rotation",
        )?;
        registry.register(Box::new(enqueue_rewrites.clone()))?;

        Ok(QueueMetrics {
            registry,
            items_enqueued,
            items_checked_out,
            checkouts,
            commits,
            merges,
            merge_wait_seconds,
            index_conflicts,
            enqueue_rewrites,
        })
    }

    pub fn inc_merges(&self, outcome: &str) {
        self.merges.with_label_values(&[outcome]).inc();
    }

    pub fn merge_count(&self, outcome: &str) -> u64 {
        self.merges.with_label_values(&[outcome]).get()
    }
}
