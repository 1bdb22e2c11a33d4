//! Error types for soak-harness

use soak_env::{BridgeError, EnvError, VersionTag, WaitError};
use soak_server::ServerError;
use thiserror::Error;

use crate::report::TallyReading;
use crate::workloads::Phase;

/// Errors that can fail a soak run
#[derive(Error, Debug)]
pub enum SoakError {
    /// The workload plan is unusable
    #[error("invalid workload plan: {0}")]
    InvalidPlan(String),

    /// `run` was called on a harness that has been torn down
    #[error("harness is not set up")]
    NotSetUp,

    /// A phase did not settle in time
    #[error("{phase} phase of {version} did not settle: {source}")]
    Timeout {
        version: VersionTag,
        phase: Phase,
        #[source]
        source: WaitError,
    },

    /// A workload script returned no progress counter
    #[error("{phase} script in {version} returned no progress counter")]
    NoProgressCounter { version: VersionTag, phase: Phase },

    /// An error tally was bound to something other than a counter
    #[error("{version} bound {} as void; error tallies must be counters", .phase.tally_name())]
    TallyNotCounter { version: VersionTag, phase: Phase },

    /// Error tallies were nonzero at the end of the run
    #[error("workload finished with errors: {}", summarize(.failures))]
    WorkloadErrors { failures: Vec<TallyReading> },

    /// Environment unusable
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Binding, evaluation or read-back failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Server could not be started or stopped
    #[error(transparent)]
    Server(#[from] ServerError),
}

impl SoakError {
    /// Setup defects: reported before the scenario runs and never retried.
    pub fn is_configuration(&self) -> bool {
        match self {
            SoakError::InvalidPlan(_) | SoakError::NotSetUp => true,
            SoakError::Env(e) => e.is_configuration(),
            SoakError::Bridge(BridgeError::Env(e)) => e.is_configuration(),
            SoakError::Bridge(BridgeError::ScriptNotFound { .. }) => true,
            SoakError::Server(e) => e.is_configuration(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SoakError::Timeout { .. })
    }
}

fn summarize(failures: &[TallyReading]) -> String {
    failures
        .iter()
        .map(|r| format!("{}.{}={}", r.version, r.phase.tally_name(), r.errors))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for harness operations
pub type SoakResult<T> = std::result::Result<T, SoakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_errors_lists_every_failure() {
        let err = SoakError::WorkloadErrors {
            failures: vec![
                TallyReading {
                    version: VersionTag::new("current").unwrap(),
                    phase: Phase::Producer,
                    errors: 2,
                },
                TallyReading {
                    version: VersionTag::new("legacy").unwrap(),
                    phase: Phase::Consumer,
                    errors: 1,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("current.errorsProducer=2"));
        assert!(msg.contains("legacy.errorsConsumer=1"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(SoakError::InvalidPlan("empty".into()).is_configuration());
        assert!(SoakError::Env(EnvError::ArtifactUnresolved {
            tag: "ghost".into(),
            reason: "unknown".into()
        })
        .is_configuration());
        let timeout = SoakError::Timeout {
            version: VersionTag::new("current").unwrap(),
            phase: Phase::Consumer,
            source: WaitError::Timeout {
                expected: "0".into(),
                last: "3".into(),
                elapsed_ms: 30_000,
            },
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_configuration());
    }

    #[test]
    fn test_tally_not_counter_names_the_binding() {
        let err = SoakError::TallyNotCounter {
            version: VersionTag::new("legacy").unwrap(),
            phase: Phase::Producer,
        };
        assert_eq!(
            err.to_string(),
            "legacy bound errorsProducer as void; error tallies must be counters"
        );
        assert!(!err.is_timeout());
    }
}
