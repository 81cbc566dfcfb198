use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Store error: {0}")]
    StoreError(#[from] bucketq_store::StoreError),

    #[error("Core error: {0}")]
    CoreError(#[from] bucketq_core::CoreError),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Timed out after {waited:?} waiting for merge of queue {key}")]
    MergeWaitTimeout { key: String, waited: Duration },

    #[error("Merge lease for queue {key} lost (token {token})")]
    MergeLeaseLost { key: String, token: u64 },

    #[error("Bucket index of queue {key} kept changing after {attempts} attempts")]
    IndexContention { key: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, QueueError>;
