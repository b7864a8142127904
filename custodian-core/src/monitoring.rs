//! Active session accounting

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts live sessions for admission control
pub trait MonitoringOperations: Send + Sync {
    fn increment_active_sessions(&self);

    fn decrement_active_sessions(&self);

    fn active_sessions(&self) -> u64;
}

/// Lock-free [`MonitoringOperations`]
#[derive(Debug, Default)]
pub struct ActiveSessionCounter {
    active: AtomicU64,
}

impl ActiveSessionCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonitoringOperations for ActiveSessionCounter {
    fn increment_active_sessions(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Never goes below zero
    fn decrement_active_sessions(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    fn active_sessions(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}
