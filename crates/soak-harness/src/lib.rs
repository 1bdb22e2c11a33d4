//! soak-harness: cross-version soak scenarios for compat-soak.
//!
//! [`SoakHarness`] starts one shared server, seeds a shared latch into every
//! version's environment, runs consumers then producers per
//! [`WorkloadPlan`], and proves every message arrived with zero errors.

pub mod config;
pub mod error;
pub mod obs;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod telemetry;
pub mod versions;
pub mod workloads;

pub use config::HarnessConfig;
pub use error::{SoakError, SoakResult};
pub use orchestrator::SoakHarness;
pub use plan::{VersionWorkload, WorkloadPlan};
pub use report::{PhaseOutcome, SoakReport, TallyReading};
pub use telemetry::init_tracing;
pub use versions::{builtin_artifact, builtin_resolver, CURRENT, LEGACY, PREVIOUS_MAJOR};
pub use workloads::{Phase, ReceiveMessages, SendMessages, RECEIVE_MESSAGES, SEND_MESSAGES};
