use bucketq_core::{DEFAULT_PREFIX, MERGE_LEASE_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub store: StoreConfig,
    pub merge: MergeConfig,
    pub merger: MergerConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

/// Merge lease and lock-wait tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub lease_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    /// `None` waits for a merge indefinitely
    pub max_wait_secs: Option<u64>,
    pub max_cas_retries: u32,
}

/// Periodic merger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    pub interval_secs: u64,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            lease_secs: MERGE_LEASE_SECS,
            poll_initial_ms: 100,
            poll_max_ms: 1000,
            max_wait_secs: Some(120),
            max_cas_retries: 64,
        }
    }
}

impl Default for MergerConfig {
    fn default() -> Self {
        MergerConfig {
            interval_secs: 300,
            keys: vec![],
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_level: "info".to_string(),
        }
    }
}

impl MergeConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms.max(1))
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms.max(self.poll_initial_ms).max(1))
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

impl MergerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl QueueConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.store.key_prefix, "QUEUES.BUCKETS");
        assert_eq!(config.merge.lease(), Duration::from_secs(60));
        assert_eq!(config.merge.poll_initial(), Duration::from_millis(100));
        assert_eq!(config.merge.max_wait(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "store:\n  redis_url: redis://cache:6379\nmerge:\n  max_wait_secs: null\nmerger:\n  keys: [posts, images]"
        )
        .unwrap();

        let config = QueueConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.store.redis_url, "redis://cache:6379");
        assert_eq!(config.store.key_prefix, "QUEUES.BUCKETS");
        assert_eq!(config.merge.max_wait(), None);
        assert_eq!(config.merge.lease_secs, 60);
        assert_eq!(config.merger.keys, vec!["posts", "images"]);
        assert_eq!(config.monitoring.log_level, "info");
    }
}
