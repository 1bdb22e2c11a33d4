//! Harness configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use soak_env::{ManagerConfig, VersionTag, WaitPolicy};
use soak_server::ServerRole;

use crate::versions::CURRENT;

/// Configuration for one soak run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    /// Server working directory. Cleared before the server starts.
    pub server_dir: PathBuf,
    /// Version whose environment hosts the server.
    pub server_version: VersionTag,
    pub server_role: ServerRole,
    /// Retain broker data. Soak runs keep this off.
    pub persistent: bool,
    /// Broker endpoint; `None` uses the server's default.
    pub endpoint: Option<String>,
    /// Worker threads per environment.
    pub worker_threads: usize,
    /// Wait for every producer thread to finish.
    pub producer_wait: WaitPolicy,
    /// Wait for every consumer to drain.
    pub drain_wait: WaitPolicy,
    /// Wait for the server to report ready.
    pub readiness_wait: WaitPolicy,
    /// Bound on a producer's wait for the latch to drain (milliseconds).
    pub latch_timeout_ms: u64,
    /// Bound on a consumer's wait for its next message (milliseconds).
    pub receive_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_dir: std::env::temp_dir().join("compat-soak").join("server"),
            server_version: VersionTag::from_static(CURRENT),
            server_role: ServerRole::Live,
            persistent: false,
            endpoint: None,
            worker_threads: ManagerConfig::default().worker_threads,
            producer_wait: WaitPolicy::producer(),
            drain_wait: WaitPolicy::drain(),
            readiness_wait: WaitPolicy::drain(),
            latch_timeout_ms: 60_000,
            receive_timeout_ms: 30_000,
        }
    }
}

impl HarnessConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            worker_threads: self.worker_threads,
        }
    }

    /// Launch settings passed to the server factory.
    pub fn server_override(&self) -> Option<serde_json::Value> {
        self.endpoint
            .as_ref()
            .map(|endpoint| serde_json::json!({ "endpoint": endpoint }))
    }
}
