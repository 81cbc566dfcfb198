pub mod checkout;
pub mod config;
pub mod error;
pub mod lease;
pub mod metrics;
pub mod queue;
pub mod scheduler;

pub use checkout::Checkout;
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use lease::MergeLease;
pub use metrics::QueueMetrics;
pub use queue::{BucketSummary, DeferredQueue, MergeReport, QueueSnapshot};
pub use scheduler::MergeScheduler;

pub use bucketq_core::{BucketIndex, BucketName, ItemId, QueueIds, QueueKeys};
pub use bucketq_store::{BucketStore, MemoryStore, RedisStore};
