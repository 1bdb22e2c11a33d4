//! Reusable countdown latch shared across environments.
//!
//! The count lives in a `tokio::sync::watch` channel so updates from any
//! environment's runtime are serialized and every waiter, on any runtime,
//! observes the transition to zero.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::value::Origin;

/// A countdown latch that can be re-armed after reaching zero.
///
/// The count never goes below zero: counting down an open latch is a no-op.
/// Clones are references to the same latch.
#[derive(Clone)]
pub struct ReusableLatch {
    count: Arc<watch::Sender<u64>>,
    origin: Origin,
}

impl ReusableLatch {
    /// A latch created outside every environment.
    pub fn new(count: u64) -> Self {
        Self::with_origin(count, Origin::Shared)
    }

    pub(crate) fn with_origin(count: u64, origin: Origin) -> Self {
        let (tx, _rx) = watch::channel(count);
        Self {
            count: Arc::new(tx),
            origin,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Current count.
    pub fn count(&self) -> u64 {
        *self.count.borrow()
    }

    /// Arm the latch with `n` more units of expected work.
    pub fn count_up(&self, n: u64) {
        if n > 0 {
            self.count.send_modify(|c| *c = c.saturating_add(n));
        }
    }

    /// Record one unit of completed work.
    pub fn count_down(&self) {
        self.count_down_by(1);
    }

    /// Record `n` units of completed work, stopping at zero.
    pub fn count_down_by(&self, n: u64) {
        self.count.send_if_modified(|c| {
            if *c == 0 || n == 0 {
                return false;
            }
            *c = c.saturating_sub(n);
            true
        });
    }

    /// Overwrite the count.
    pub fn set_count(&self, n: u64) {
        self.count.send_replace(n);
    }

    /// Wait until the count reaches zero. Returns `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|c| *c == 0)).await;
        matches!(waited, Ok(Ok(_)))
    }

    /// Whether two handles refer to the same latch.
    pub fn same_latch(&self, other: &ReusableLatch) -> bool {
        Arc::ptr_eq(&self.count, &other.count)
    }
}

impl std::fmt::Debug for ReusableLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReusableLatch")
            .field("count", &self.count())
            .field("origin", &self.origin)
            .finish()
    }
}
