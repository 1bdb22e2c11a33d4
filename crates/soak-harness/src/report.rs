//! Soak run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use soak_env::VersionTag;
use uuid::Uuid;

use crate::error::{SoakError, SoakResult};
use crate::workloads::Phase;

/// One error tally read back after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReading {
    pub version: VersionTag,
    pub phase: Phase,
    pub errors: i64,
}

impl TallyReading {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// How one version's phase settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub version: VersionTag,
    pub phase: Phase,
    /// Producer threads or consumer listeners launched.
    pub units: u64,
    /// Progress counter value the phase settled at.
    pub settled_at: i64,
    /// Time from the start of the wait until the phase settled.
    pub wait_ms: u64,
}

/// Result of one soak run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoakReport {
    pub run_id: Uuid,
    pub plan_digest: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub destination: String,
    pub total_messages_per_queue: u64,
    pub multiply_factor: u64,
    pub outcomes: Vec<PhaseOutcome>,
    pub tallies: Vec<TallyReading>,
    /// Latch count after every phase settled.
    pub latch_remaining: u64,
    pub passed: bool,
}

impl SoakReport {
    /// Tallies that recorded errors.
    pub fn failures(&self) -> Vec<TallyReading> {
        self.tallies.iter().filter(|t| !t.is_clean()).cloned().collect()
    }

    /// `Ok(self)` when every tally is zero, else [`SoakError::WorkloadErrors`].
    pub fn into_result(self) -> SoakResult<Self> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(SoakError::WorkloadErrors { failures })
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
