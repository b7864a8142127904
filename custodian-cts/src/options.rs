//! Per-operation options for token tasks.

use std::time::Duration;

/// Options bag attached to create, read, update and delete tasks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    ttl: Option<Duration>,
    pre_delete_read: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire tokens written without an explicit expiry after `ttl`
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Return the full attribute set of a deleted token
    #[must_use]
    pub fn with_pre_delete_read(mut self) -> Self {
        self.pre_delete_read = true;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn pre_delete_read(&self) -> bool {
        self.pre_delete_read
    }
}
