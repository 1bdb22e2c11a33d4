//! Atomic broker counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`BrokerStats::flush`] to emit current values as a single
//! `tracing::info!` event (the reference server does so when it stops).

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one broker.
#[derive(Debug)]
pub struct BrokerStats {
    published: AtomicU64,
    delivered: AtomicU64,
    subscriptions: AtomicU64,
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerStats {
    pub const fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
        }
    }

    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_delivered(&self, n: u64) {
        self.delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_subscriptions(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "subscriptions", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self, endpoint: &str) {
        tracing::info!(
            metric = "broker.flush",
            endpoint = %endpoint,
            published = self.published(),
            delivered = self.delivered(),
            subscriptions = self.subscriptions(),
        );
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }
}
