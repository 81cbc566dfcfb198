use crate::{CoreError, Result};

/// Default namespace for every key the queue touches
pub const DEFAULT_PREFIX: &str = "QUEUES.BUCKETS";

/// Centralizes the store key naming scheme.
///
/// - `<prefix>`: hash of queue key to serialized [`BucketIndex`](crate::BucketIndex)
/// - `<prefix>:<key>:<millis>-<nonce>`: bucket set
/// - `<prefix>:<key>:merging`: merge lease marker
/// - `<prefix>:<key>:fence`: fencing token counter
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.is_empty() {
            DEFAULT_PREFIX.to_string()
        } else {
            prefix
        };
        QueueKeys { prefix }
    }

    /// Hash holding the bucket index of every queue
    pub fn index(&self) -> &str {
        &self.prefix
    }

    /// Prefix shared by all buckets of a queue
    pub fn bucket_prefix(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub fn merge_lock(&self, key: &str) -> String {
        format!("{}:{}:merging", self.prefix, key)
    }

    pub fn fence(&self, key: &str) -> String {
        format!("{}:{}:fence", self.prefix, key)
    }

    /// Reject empty keys and keys containing whitespace
    pub fn validate(key: &str) -> Result<()> {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(CoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        QueueKeys::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = QueueKeys::default();
        assert_eq!(keys.index(), "QUEUES.BUCKETS");
        assert_eq!(keys.bucket_prefix("images"), "QUEUES.BUCKETS:images");
        assert_eq!(keys.merge_lock("images"), "QUEUES.BUCKETS:images:merging");
        assert_eq!(keys.fence("images"), "QUEUES.BUCKETS:images:fence");
    }

    #[test]
    fn test_empty_prefix_falls_back_to_default() {
        assert_eq!(QueueKeys::new("").index(), DEFAULT_PREFIX);
    }

    #[test]
    fn test_validate() {
        assert!(QueueKeys::validate("post-metrics").is_ok());
        assert!(QueueKeys::validate("").is_err());
        assert!(QueueKeys::validate("a b").is_err());
    }
}
