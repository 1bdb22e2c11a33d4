//! Server control surface.
//!
//! The broker itself is an external collaborator. A version artifact that
//! can host a server exposes a [`ServerFactory`] capability; the lifecycle
//! controller launches it inside that version's environment and drives it
//! through [`ServerControl`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use soak_env::{Environment, VersionArtifact, VersionTag};

use crate::error::ServerResult;

/// Capability name under which a version artifact publishes its server factory.
pub const SERVER_CAPABILITY: &str = "server";

/// Endpoint used when a launch does not override it.
pub const DEFAULT_ENDPOINT: &str = "mem://localhost:61616";

/// Role a server plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    #[default]
    Live,
    Backup,
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerRole::Live => write!(f, "live"),
            ServerRole::Backup => write!(f, "backup"),
        }
    }
}

impl std::str::FromStr for ServerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" | "primary" => Ok(ServerRole::Live),
            "backup" => Ok(ServerRole::Backup),
            other => Err(format!("unknown server role {other:?}")),
        }
    }
}

/// Everything a factory needs to launch one server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerLaunch {
    /// Working directory, already cleared by the lifecycle controller.
    pub root_dir: PathBuf,
    pub role: ServerRole,
    /// Whether data is retained across restarts.
    pub persistent: bool,
    /// Free-form settings interpreted by the server implementation.
    pub config_override: Option<serde_json::Value>,
    /// Versions expected to talk to this server.
    pub versions: Vec<VersionTag>,
}

impl ServerLaunch {
    /// A string setting from the override, if present.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.config_override
            .as_ref()
            .and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
    }

    /// An integer setting from the override, if present.
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.config_override
            .as_ref()
            .and_then(|o| o.get(key))
            .and_then(|v| v.as_u64())
    }

    /// Endpoint from the override, or [`DEFAULT_ENDPOINT`].
    pub fn endpoint(&self) -> String {
        self.setting("endpoint").unwrap_or(DEFAULT_ENDPOINT).to_string()
    }
}

/// A running server.
#[async_trait]
pub trait ServerControl: Send + Sync {
    /// Address clients connect to.
    fn endpoint(&self) -> String;

    /// Whether the server accepts connections.
    fn is_ready(&self) -> bool;

    /// Stop the server. Stopping a stopped server succeeds.
    async fn stop(&self) -> ServerResult<()>;
}

/// Launches servers for one version.
#[async_trait]
pub trait ServerFactory: Send + Sync {
    /// Start a server inside `env`. May return before the server is ready.
    async fn launch(
        &self,
        launch: &ServerLaunch,
        env: &Environment,
    ) -> ServerResult<Box<dyn ServerControl>>;
}

/// Wrapper stored as a version artifact capability.
pub struct ServerCapability(pub Arc<dyn ServerFactory>);

/// Attach or look up a server factory on a version artifact.
pub trait ArtifactServerExt {
    fn with_server(self, factory: Arc<dyn ServerFactory>) -> Self;
    fn server_factory(&self) -> Option<Arc<dyn ServerFactory>>;
}

impl ArtifactServerExt for VersionArtifact {
    fn with_server(self, factory: Arc<dyn ServerFactory>) -> Self {
        self.with_capability(SERVER_CAPABILITY, Arc::new(ServerCapability(factory)))
    }

    fn server_factory(&self) -> Option<Arc<dyn ServerFactory>> {
        self.capability::<ServerCapability>(SERVER_CAPABILITY)
            .map(|cap| Arc::clone(&cap.0))
    }
}

/// Describes a server started by the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerHandle {
    pub version: VersionTag,
    pub role: ServerRole,
    pub root_dir: PathBuf,
    pub endpoint: String,
    pub persistent: bool,
}
