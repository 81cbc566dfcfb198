mod ids;
mod bucket;
mod keys;
mod error;

pub use ids::{ItemId, QueueIds};
pub use bucket::{BucketIndex, BucketName};
pub use keys::{QueueKeys, DEFAULT_PREFIX};
pub use error::{CoreError, Result};

/// Lifetime of a merge lease
pub const MERGE_LEASE_SECS: u64 = 60;
