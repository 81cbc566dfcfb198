use crate::{CoreError, QueueKeys, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a bucket set in the store.
///
/// Names are `<prefix>:<key>:<millis>-<nonce>`; the nonce keeps two buckets
/// created in the same millisecond apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    /// Create a fresh bucket name for `key`, stamped with the current time
    pub fn generate(keys: &QueueKeys, key: &str) -> Self {
        Self::generate_at(keys, key, Utc::now())
    }

    pub fn generate_at(keys: &QueueKeys, key: &str, now: DateTime<Utc>) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        BucketName(format!(
            "{}:{}-{}",
            keys.bucket_prefix(key),
            now.timestamp_millis(),
            &nonce[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the name, if it follows the naming scheme
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let stamp = self.0.rsplit(':').next()?;
        let millis = stamp.split('-').next()?.parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BucketName {
    fn from(name: String) -> Self {
        BucketName(name)
    }
}

impl From<&str> for BucketName {
    fn from(name: &str) -> Self {
        BucketName(name.to_string())
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ordered bucket list of one queue. The front entry is the active bucket.
///
/// Every write of an index goes through a compare-and-swap on `version`, so
/// a writer that read a stale index has to re-read before it can publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIndex {
    pub version: u64,
    pub buckets: Vec<BucketName>,
}

impl BucketIndex {
    pub fn new(version: u64, buckets: Vec<BucketName>) -> Self {
        BucketIndex { version, buckets }
    }

    /// Bucket that receives new enqueues
    pub fn active(&self) -> Option<&BucketName> {
        self.buckets.first()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn contains(&self, bucket: &BucketName) -> bool {
        self.buckets.contains(bucket)
    }

    /// Bucket list with `bucket` pushed to the front
    pub fn with_front(&self, bucket: BucketName) -> Vec<BucketName> {
        let mut buckets = Vec::with_capacity(self.buckets.len() + 1);
        buckets.push(bucket);
        buckets.extend(self.buckets.iter().cloned());
        buckets
    }

    /// Bucket list without any of `removed`, matched by name
    pub fn without(&self, removed: &[BucketName]) -> Vec<BucketName> {
        self.buckets
            .iter()
            .filter(|bucket| !removed.contains(bucket))
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a stored index record.
    ///
    /// Bare lists and bare strings written by older producers are accepted
    /// and read as version 0.
    pub fn from_json(raw: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Stored {
            Record(BucketIndex),
            List(Vec<BucketName>),
            Single(BucketName),
        }

        match serde_json::from_str::<Stored>(raw) {
            Ok(Stored::Record(index)) => Ok(index),
            Ok(Stored::List(buckets)) => Ok(BucketIndex::new(0, buckets)),
            Ok(Stored::Single(bucket)) => Ok(BucketIndex::new(0, vec![bucket])),
            Err(e) => Err(CoreError::InvalidIndex(format!("{}: {}", raw, e))),
        }
    }
}
