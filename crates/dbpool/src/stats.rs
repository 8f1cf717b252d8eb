//! Pool statistics for observability.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time snapshot of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub endpoint: String,
    pub max_size: usize,
    /// Raw connections currently in existence.
    pub total: usize,
    /// Raw connections sitting in the idle queue.
    pub idle: usize,
    /// Raw connections checked out (`total - idle`).
    pub active: usize,
    pub shut_down: bool,
    /// Raw connections created over the pool's lifetime.
    pub created: u64,
    /// Raw connections destroyed over the pool's lifetime.
    pub destroyed: u64,
    /// Acquisitions that had to block.
    pub waits: u64,
    /// Acquisitions that gave up with `ResourceExhausted`.
    pub timeouts: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolStats(endpoint={}, total={}, idle={}, active={}, max_size={})",
            self.endpoint, self.total, self.idle, self.active, self.max_size
        )
    }
}

/// Lifetime counters, updated without taking the pool lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    waits: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.created.load(Ordering::Relaxed),
            self.destroyed.load(Ordering::Relaxed),
            self.waits.load(Ordering::Relaxed),
            self.timeouts.load(Ordering::Relaxed),
        )
    }
}
