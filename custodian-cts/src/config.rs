//! Configuration for the token task queue.

use serde::{Deserialize, Serialize};

/// Default number of concurrently executing series
pub const DEFAULT_WORKERS: usize = 8;

/// Default number of tasks that may be queued or running at once
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default per-subscriber buffer of the in-memory change feed
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1024;

/// Sizing of the task queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Size of the worker pool shared by all series.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Tasks accepted but not yet completed, across all series.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Buffer of the in-memory backend's change feed.
    #[serde(default = "default_change_feed_capacity")]
    pub change_feed_capacity: usize,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_change_feed_capacity() -> usize {
    DEFAULT_CHANGE_FEED_CAPACITY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            capacity: default_capacity(),
            change_feed_capacity: default_change_feed_capacity(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_change_feed_capacity(mut self, capacity: usize) -> Self {
        self.change_feed_capacity = capacity;
        self
    }

    /// Check the config is usable (non-zero sizes)
    pub fn is_valid(&self) -> bool {
        self.workers > 0 && self.capacity > 0 && self.change_feed_capacity > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = QueueConfig::default();
        assert_eq!(config.workers, 8);
        assert_eq!(config.capacity, 1024);
        assert!(config.is_valid());
    }

    #[test]
    fn config_builder_pattern() {
        let config = QueueConfig::default().with_workers(2).with_capacity(16);
        assert_eq!(config.workers, 2);
        assert_eq!(config.capacity, 16);
    }

    #[test]
    fn zero_workers_is_invalid() {
        assert!(!QueueConfig::default().with_workers(0).is_valid());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"workers": 3}"#).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
    }
}
