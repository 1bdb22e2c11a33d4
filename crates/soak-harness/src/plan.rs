//! Workload plan: how much each version produces and consumes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use soak_env::VersionTag;

use crate::error::{SoakError, SoakResult};
use crate::versions::{CURRENT, LEGACY, PREVIOUS_MAJOR};
use crate::workloads::{Phase, DEFAULT_DESTINATION};

/// Per-version workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionWorkload {
    pub version: VersionTag,
    #[serde(default)]
    pub producer_threads: u64,
    #[serde(default)]
    pub messages_per_thread: u64,
    #[serde(default)]
    pub consumers: u64,
}

impl VersionWorkload {
    pub fn new(version: VersionTag) -> Self {
        Self {
            version,
            producer_threads: 0,
            messages_per_thread: 0,
            consumers: 0,
        }
    }

    pub fn producers(mut self, threads: u64, messages_per_thread: u64) -> Self {
        self.producer_threads = threads;
        self.messages_per_thread = messages_per_thread;
        self
    }

    pub fn consumers(mut self, consumers: u64) -> Self {
        self.consumers = consumers;
        self
    }

    /// Messages this version publishes to the destination.
    pub fn messages_sent(&self) -> u64 {
        self.producer_threads * self.messages_per_thread
    }

    /// Whether this version takes part in `phase`.
    pub fn participates(&self, phase: Phase) -> bool {
        match phase {
            Phase::Producer => self.producer_threads > 0,
            Phase::Consumer => self.consumers > 0,
        }
    }
}

/// The whole soak workload against one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadPlan {
    #[serde(default = "default_destination")]
    pub destination: String,
    pub versions: Vec<VersionWorkload>,
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

impl Default for WorkloadPlan {
    /// Two producing versions of 2x5 messages each, consumed by 10, 5 and 10
    /// listeners in three versions.
    fn default() -> Self {
        Self {
            destination: default_destination(),
            versions: vec![
                VersionWorkload::new(VersionTag::from_static(CURRENT)).producers(2, 5).consumers(10),
                VersionWorkload::new(VersionTag::from_static(PREVIOUS_MAJOR)).consumers(5),
                VersionWorkload::new(VersionTag::from_static(LEGACY)).producers(2, 5).consumers(10),
            ],
        }
    }
}

impl WorkloadPlan {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            versions: Vec::new(),
        }
    }

    pub fn with_version(mut self, workload: VersionWorkload) -> Self {
        self.versions.push(workload);
        self
    }

    /// Keep only the listed versions, in plan order.
    pub fn restricted_to(mut self, tags: &[VersionTag]) -> Self {
        self.versions.retain(|w| tags.contains(&w.version));
        self
    }

    pub fn tags(&self) -> Vec<VersionTag> {
        self.versions.iter().map(|w| w.version.clone()).collect()
    }

    /// Messages every consumer must receive: the sum over versions of
    /// producer threads times messages per thread.
    pub fn total_messages_per_queue(&self) -> u64 {
        self.versions.iter().map(VersionWorkload::messages_sent).sum()
    }

    /// Total consumer listeners across every version.
    pub fn multiply_factor(&self) -> u64 {
        self.versions.iter().map(|w| w.consumers).sum()
    }

    pub fn validate(&self) -> SoakResult<()> {
        if self.destination.trim().is_empty() {
            return Err(SoakError::InvalidPlan("destination must not be empty".into()));
        }
        if self.versions.is_empty() {
            return Err(SoakError::InvalidPlan("plan names no versions".into()));
        }

        let mut seen = HashSet::new();
        for w in &self.versions {
            if !seen.insert(&w.version) {
                return Err(SoakError::InvalidPlan(format!(
                    "version {} appears more than once",
                    w.version
                )));
            }
            if w.producer_threads > 0 && w.messages_per_thread == 0 {
                return Err(SoakError::InvalidPlan(format!(
                    "version {} has producer threads but sends no messages",
                    w.version
                )));
            }
        }

        if self.total_messages_per_queue() == 0 {
            return Err(SoakError::InvalidPlan("plan has no producers".into()));
        }
        if self.multiply_factor() == 0 {
            return Err(SoakError::InvalidPlan("plan has no consumers".into()));
        }
        Ok(())
    }

    /// Deterministic sha256 hex digest of the plan's JSON form.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}
