//! Isolated execution environments, one per product version.
//!
//! An environment resolves scripts against its own artifact first and the
//! shared base second, never against another environment. It owns its
//! binding table and a dedicated tokio runtime for the work its scripts
//! spawn; releasing the environment shuts that runtime down.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::base::SharedBase;
use crate::error::{EnvError, EnvResult};
use crate::script::{Script, ScriptCatalog, ScriptRef};
use crate::tag::VersionTag;
use crate::value::{Origin, SharedObject, Value};

/// Identity of one environment instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(pub Uuid);

impl EnvironmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvironmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one product version contributes: its scripts and any
/// capabilities (such as a server factory) other layers look up by name.
#[derive(Debug, Clone)]
pub struct VersionArtifact {
    tag: VersionTag,
    scripts: ScriptCatalog,
    capabilities: HashMap<String, SharedObject>,
}

impl VersionArtifact {
    pub fn new(tag: VersionTag) -> Self {
        Self {
            tag,
            scripts: ScriptCatalog::new(),
            capabilities: HashMap::new(),
        }
    }

    pub fn with_script(mut self, id: impl Into<ScriptRef>, script: Arc<dyn Script>) -> Self {
        self.scripts.insert(id, script);
        self
    }

    pub fn with_capability<T: Any + Send + Sync>(
        mut self,
        name: impl Into<String>,
        capability: Arc<T>,
    ) -> Self {
        self.capabilities
            .insert(name.into(), SharedObject::new(capability, Origin::Shared));
        self
    }

    pub fn tag(&self) -> &VersionTag {
        &self.tag
    }

    pub fn scripts(&self) -> &ScriptCatalog {
        &self.scripts
    }

    pub fn capability<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.capabilities.get(name).and_then(|c| c.downcast::<T>())
    }
}

/// An isolated execution context bound to one version.
pub struct Environment {
    id: EnvironmentId,
    artifact: VersionArtifact,
    base: Arc<SharedBase>,
    bindings: RwLock<HashMap<String, Value>>,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    released: AtomicBool,
}

impl Environment {
    /// Build an environment with its own worker runtime.
    pub(crate) fn build(
        artifact: VersionArtifact,
        base: Arc<SharedBase>,
        worker_threads: usize,
    ) -> EnvResult<Self> {
        let tag = artifact.tag().clone();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(format!("soak-{tag}-worker"))
            .enable_all()
            .build()
            .map_err(|source| EnvError::Runtime {
                tag: tag.to_string(),
                source,
            })?;
        let handle = runtime.handle().clone();
        let id = EnvironmentId::new();

        debug!(version = %tag, env_id = %id, worker_threads, "environment built");

        Ok(Self {
            id,
            artifact,
            base,
            bindings: RwLock::new(HashMap::new()),
            runtime: Mutex::new(Some(runtime)),
            handle,
            released: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> EnvironmentId {
        self.id
    }

    pub fn tag(&self) -> &VersionTag {
        self.artifact.tag()
    }

    pub fn artifact(&self) -> &VersionArtifact {
        &self.artifact
    }

    pub fn shared(&self) -> &SharedBase {
        &self.base
    }

    /// An owned handle to the shared base, for objects that outlive a call.
    pub fn shared_handle(&self) -> Arc<SharedBase> {
        Arc::clone(&self.base)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Fail with [`EnvError::Released`] once the environment is torn down.
    pub fn ensure_live(&self) -> EnvResult<()> {
        if self.is_released() {
            return Err(EnvError::Released {
                tag: self.tag().to_string(),
                id: self.id,
            });
        }
        Ok(())
    }

    /// Resolve a script: own artifact first, then the shared base.
    pub fn resolve_script(&self, id: &ScriptRef) -> Option<Arc<dyn Script>> {
        self.artifact
            .scripts()
            .get(id)
            .or_else(|| self.base.script(id))
    }

    pub fn binding(&self, name: &str) -> Option<Value> {
        self.bindings.read().unwrap().get(name).cloned()
    }

    /// Names currently bound, sorted.
    pub fn binding_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn bind(&self, name: &str, value: Value) {
        self.bindings.write().unwrap().insert(name.to_string(), value);
    }

    /// Handle to this environment's worker runtime.
    pub fn runtime_handle(&self) -> EnvResult<Handle> {
        self.ensure_live()?;
        Ok(self.handle.clone())
    }

    /// Tear down: drop bindings and stop the worker runtime without waiting
    /// for stranded tasks. Returns `false` if already released.
    pub(crate) fn shutdown(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.bindings.write().unwrap().clear();
        if let Some(runtime) = self.runtime.lock().unwrap().take() {
            runtime.shutdown_background();
        }
        info!(version = %self.tag(), env_id = %self.id, "environment released");
        true
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shut down in the background instead.
        if let Ok(mut slot) = self.runtime.lock() {
            if let Some(runtime) = slot.take() {
                runtime.shutdown_background();
            }
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("tag", self.tag())
            .field("released", &self.is_released())
            .finish()
    }
}
