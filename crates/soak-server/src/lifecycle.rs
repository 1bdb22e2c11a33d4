//! Server lifecycle controller.
//!
//! Starts one server per environment and blocks until it is ready. Stopping
//! is idempotent.

use std::collections::HashMap;
use std::path::Path;

use soak_env::{await_true, bridge, Environment, VersionTag, WaitPolicy};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::control::{ArtifactServerExt, ServerControl, ServerHandle, ServerLaunch, ServerRole};
use crate::error::{ServerError, ServerResult};

/// Binding that tells server-side scripts whether data is retained.
pub const PERSISTENT_BINDING: &str = "persistent";
/// Binding that tells server-side scripts which role they play.
pub const ROLE_BINDING: &str = "serverRole";

struct RunningServer {
    handle: ServerHandle,
    control: Box<dyn ServerControl>,
}

/// Starts and stops servers inside environments.
pub struct ServerLifecycle {
    readiness: WaitPolicy,
    running: Mutex<HashMap<VersionTag, RunningServer>>,
}

impl Default for ServerLifecycle {
    fn default() -> Self {
        Self::new(WaitPolicy::drain())
    }
}

impl ServerLifecycle {
    pub fn new(readiness: WaitPolicy) -> Self {
        Self {
            readiness,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn readiness(&self) -> &WaitPolicy {
        &self.readiness
    }

    /// Clear `work_dir`, launch the environment's server there and wait until
    /// it reports ready.
    pub async fn start(
        &self,
        work_dir: &Path,
        env: &Environment,
        role: ServerRole,
        config_override: Option<serde_json::Value>,
        persistent: bool,
        versions: &[VersionTag],
    ) -> ServerResult<ServerHandle> {
        env.ensure_live()?;
        let version = env.tag().clone();

        let mut running = self.running.lock().await;
        if running.contains_key(&version) {
            return Err(ServerError::AlreadyRunning {
                version: version.to_string(),
            });
        }

        let factory = env
            .artifact()
            .server_factory()
            .ok_or_else(|| ServerError::NoServerFactory {
                version: version.to_string(),
            })?;

        clear_directory(work_dir)?;

        bridge::set_variable(env, PERSISTENT_BINDING, persistent)?;
        bridge::set_variable(env, ROLE_BINDING, role.to_string())?;

        let launch = ServerLaunch {
            root_dir: work_dir.to_path_buf(),
            role,
            persistent,
            config_override,
            versions: versions.to_vec(),
        };
        let control = factory.launch(&launch, env).await?;

        if let Err(source) = await_true(|| control.is_ready(), &self.readiness).await {
            if let Err(e) = control.stop().await {
                warn!(version = %version, error = %e, "stop after failed start also failed");
            }
            return Err(ServerError::NotReady {
                version: version.to_string(),
                source,
            });
        }

        let handle = ServerHandle {
            version: version.clone(),
            role,
            root_dir: launch.root_dir,
            endpoint: control.endpoint(),
            persistent,
        };
        info!(
            version = %version,
            role = %role,
            endpoint = %handle.endpoint,
            persistent,
            "server ready"
        );
        running.insert(
            version,
            RunningServer {
                handle: handle.clone(),
                control,
            },
        );
        Ok(handle)
    }

    /// Stop the server running in `env`. Returns `false` when none was running.
    pub async fn stop(&self, env: &Environment) -> ServerResult<bool> {
        self.stop_version(env.tag()).await
    }

    /// Stop by version tag. Usable after the environment has been released.
    pub async fn stop_version(&self, version: &VersionTag) -> ServerResult<bool> {
        let Some(server) = self.running.lock().await.remove(version) else {
            return Ok(false);
        };
        server.control.stop().await?;
        info!(version = %version, endpoint = %server.handle.endpoint, "server stopped");
        Ok(true)
    }

    /// Stop every running server, logging failures. Returns how many stopped.
    pub async fn stop_all(&self) -> usize {
        let servers: Vec<(VersionTag, RunningServer)> =
            self.running.lock().await.drain().collect();
        let mut stopped = 0;
        for (version, server) in servers {
            match server.control.stop().await {
                Ok(()) => stopped += 1,
                Err(e) => warn!(version = %version, error = %e, "server stop failed"),
            }
        }
        stopped
    }

    pub async fn is_running(&self, version: &VersionTag) -> bool {
        self.running.lock().await.contains_key(version)
    }

    pub async fn handle(&self, version: &VersionTag) -> Option<ServerHandle> {
        self.running
            .lock()
            .await
            .get(version)
            .map(|s| s.handle.clone())
    }
}

/// Remove `dir` and everything under it, then recreate it empty.
pub fn clear_directory(dir: &Path) -> ServerResult<()> {
    let to_error = |source| ServerError::Directory {
        path: dir.to_path_buf(),
        source,
    };
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(to_error(e)),
    }
    std::fs::create_dir_all(dir).map_err(to_error)
}
