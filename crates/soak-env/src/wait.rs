//! Bounded polling assertion.
//!
//! The only cross-environment synchronization the harness relies on: poll a
//! value exposed by reference until it matches, or fail at the deadline with
//! the last value seen.

use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::WaitError;

/// Timeout and poll interval for one bounded wait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Give up after this long (milliseconds).
    pub timeout_ms: u64,
    /// Pause between polls (milliseconds).
    pub poll_interval_ms: u64,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            poll_interval_ms: poll_interval.as_millis() as u64,
        }
    }

    /// Producer completion: five minutes, polled every 100ms.
    pub fn producer() -> Self {
        Self {
            timeout_ms: 5 * 60 * 1000,
            poll_interval_ms: 100,
        }
    }

    /// Consumer drain and server readiness: thirty seconds, polled every 10ms.
    pub fn drain() -> Self {
        Self {
            timeout_ms: 30_000,
            poll_interval_ms: 10,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::drain()
    }
}

/// Poll `supplier` until it returns `expected` or the policy's timeout
/// elapses.
///
/// The supplier runs at least once and once more at the deadline.
pub async fn await_equals<T, F>(expected: T, mut supplier: F, policy: &WaitPolicy) -> Result<(), WaitError>
where
    T: PartialEq + Debug,
    F: FnMut() -> T,
{
    let start = Instant::now();
    let timeout = policy.timeout();
    let interval = policy.poll_interval();

    loop {
        let observed = supplier();
        if observed == expected {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(WaitError::Timeout {
                expected: format!("{expected:?}"),
                last: format!("{observed:?}"),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Poll `condition` until it holds.
pub async fn await_true<F>(condition: F, policy: &WaitPolicy) -> Result<(), WaitError>
where
    F: FnMut() -> bool,
{
    await_equals(true, condition, policy).await
}
