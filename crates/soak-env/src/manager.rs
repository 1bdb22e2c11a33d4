//! Isolation manager: one environment per version tag per run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::base::SharedBase;
use crate::bridge;
use crate::environment::{Environment, VersionArtifact};
use crate::error::{BridgeResult, EnvError, EnvResult};
use crate::script::ScriptCommand;
use crate::tag::VersionTag;
use crate::value::ResultHandle;

/// Resolves a version tag to that version's artifact.
///
/// Resolution failures are configuration errors; the manager never retries.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, tag: &VersionTag) -> EnvResult<VersionArtifact>;
}

type ArtifactBuilder = Arc<dyn Fn(&VersionTag) -> VersionArtifact + Send + Sync>;

/// In-memory resolver mapping tags to artifact builders.
#[derive(Clone, Default)]
pub struct CatalogResolver {
    builders: HashMap<VersionTag, ArtifactBuilder>,
}

impl CatalogResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version<F>(mut self, tag: VersionTag, builder: F) -> Self
    where
        F: Fn(&VersionTag) -> VersionArtifact + Send + Sync + 'static,
    {
        self.builders.insert(tag, Arc::new(builder));
        self
    }

    /// Known tags, sorted.
    pub fn versions(&self) -> Vec<VersionTag> {
        let mut tags: Vec<VersionTag> = self.builders.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl ArtifactResolver for CatalogResolver {
    fn resolve(&self, tag: &VersionTag) -> EnvResult<VersionArtifact> {
        let builder = self
            .builders
            .get(tag)
            .ok_or_else(|| EnvError::ArtifactUnresolved {
                tag: tag.to_string(),
                reason: format!(
                    "no artifact registered (known: {})",
                    self.versions()
                        .iter()
                        .map(VersionTag::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;
        Ok(builder(tag))
    }
}

/// Isolation manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Worker threads in each environment's runtime.
    pub worker_threads: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { worker_threads: 4 }
    }
}

/// Builds, caches and releases environments.
pub struct IsolationManager {
    resolver: Arc<dyn ArtifactResolver>,
    base: Arc<SharedBase>,
    config: ManagerConfig,
    environments: Mutex<HashMap<VersionTag, Arc<Environment>>>,
}

impl IsolationManager {
    pub fn new(resolver: Arc<dyn ArtifactResolver>, config: ManagerConfig) -> Self {
        Self::with_base(resolver, Arc::new(SharedBase::new()), config)
    }

    pub fn with_base(
        resolver: Arc<dyn ArtifactResolver>,
        base: Arc<SharedBase>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            resolver,
            base,
            config,
            environments: Mutex::new(HashMap::new()),
        }
    }

    /// The shared base all environments are layered on.
    pub fn shared(&self) -> &Arc<SharedBase> {
        &self.base
    }

    /// The environment for `tag`, building it on first use.
    ///
    /// Repeated calls with the same tag return the same environment until it
    /// is released.
    pub fn acquire(&self, tag: &VersionTag) -> EnvResult<Arc<Environment>> {
        let mut envs = self.environments.lock().unwrap();
        if let Some(env) = envs.get(tag) {
            return Ok(Arc::clone(env));
        }

        let artifact = self.resolver.resolve(tag)?;
        if artifact.tag() != tag {
            return Err(EnvError::ArtifactUnresolved {
                tag: tag.to_string(),
                reason: format!("resolver returned artifact for {}", artifact.tag()),
            });
        }

        let env = Arc::new(Environment::build(
            artifact,
            Arc::clone(&self.base),
            self.config.worker_threads,
        )?);
        info!(
            version = %tag,
            env_id = %env.id(),
            scripts = env.artifact().scripts().len(),
            "environment acquired"
        );
        envs.insert(tag.clone(), Arc::clone(&env));
        Ok(env)
    }

    /// An already-acquired environment.
    pub fn get(&self, tag: &VersionTag) -> Option<Arc<Environment>> {
        self.environments.lock().unwrap().get(tag).cloned()
    }

    /// Acquired tags, sorted.
    pub fn environments(&self) -> Vec<VersionTag> {
        let mut tags: Vec<VersionTag> = self.environments.lock().unwrap().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Release an environment and everything it owns.
    ///
    /// Returns `false` if it was already released.
    pub fn release(&self, env: &Environment) -> bool {
        {
            let mut envs = self.environments.lock().unwrap();
            if envs.get(env.tag()).map(|e| e.id()) == Some(env.id()) {
                envs.remove(env.tag());
            }
        }
        env.shutdown()
    }

    /// Release every environment. Returns how many were torn down.
    pub fn release_all(&self) -> usize {
        let envs: Vec<Arc<Environment>> = self
            .environments
            .lock()
            .unwrap()
            .drain()
            .map(|(_, env)| env)
            .collect();
        let mut released = 0;
        for env in envs {
            if env.shutdown() {
                released += 1;
            } else {
                warn!(version = %env.tag(), "environment was already released");
            }
        }
        released
    }

    /// Acquire the command's environment and evaluate the command in it.
    pub fn dispatch(&self, command: &ScriptCommand) -> BridgeResult<ResultHandle> {
        let env = self.acquire(&command.version)?;
        bridge::evaluate(&env, &command.script, &command.args)
    }
}

impl Drop for IsolationManager {
    fn drop(&mut self) {
        if let Ok(mut envs) = self.environments.lock() {
            for (_, env) in envs.drain() {
                env.shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::script_fn;

    fn tag(s: &str) -> VersionTag {
        VersionTag::new(s).unwrap()
    }

    fn resolver() -> Arc<dyn ArtifactResolver> {
        Arc::new(
            CatalogResolver::new()
                .with_version(tag("current"), |t| {
                    VersionArtifact::new(t.clone())
                        .with_script("noop", script_fn(|_, _| Ok(ResultHandle::Void)))
                })
                .with_version(tag("legacy"), |t| VersionArtifact::new(t.clone())),
        )
    }

    #[test]
    fn test_acquire_is_idempotent_per_tag() {
        let manager = IsolationManager::new(resolver(), ManagerConfig { worker_threads: 1 });
        let a = manager.acquire(&tag("current")).unwrap();
        let b = manager.acquire(&tag("current")).unwrap();
        let c = manager.acquire(&tag("legacy")).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(manager.environments(), vec![tag("current"), tag("legacy")]);
        assert_eq!(manager.release_all(), 2);
    }

    #[test]
    fn test_unknown_version_fails_fast() {
        let manager = IsolationManager::new(resolver(), ManagerConfig { worker_threads: 1 });
        let err = manager.acquire(&tag("ancient")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("known: current, legacy"));
        assert!(manager.environments().is_empty());
    }

    #[test]
    fn test_release_then_reacquire_builds_fresh_environment() {
        let manager = IsolationManager::new(resolver(), ManagerConfig { worker_threads: 1 });
        let first = manager.acquire(&tag("current")).unwrap();
        assert!(manager.release(&first));
        assert!(!manager.release(&first));
        assert!(first.is_released());

        let second = manager.acquire(&tag("current")).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(!second.is_released());
    }

    #[test]
    fn test_mismatched_artifact_is_configuration_error() {
        let bad = CatalogResolver::new()
            .with_version(tag("current"), |_| VersionArtifact::new(VersionTag::new("legacy").unwrap()));
        let manager = IsolationManager::new(Arc::new(bad), ManagerConfig { worker_threads: 1 });
        assert!(manager.acquire(&tag("current")).unwrap_err().is_configuration());
    }

    #[test]
    fn test_dispatch_runs_in_target_environment() {
        let manager = IsolationManager::new(resolver(), ManagerConfig { worker_threads: 1 });
        let handle = manager
            .dispatch(&ScriptCommand::new(tag("current"), "noop"))
            .unwrap();
        assert!(handle.is_void());
        assert!(manager
            .dispatch(&ScriptCommand::new(tag("legacy"), "noop"))
            .is_err());
    }
}
