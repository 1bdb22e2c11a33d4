//! Reference server backed by [`MemoryBroker`].
//!
//! Every version artifact the harness ships uses this server. On launch it
//! prepares its data layout under the working directory and registers its
//! broker in the shared base under the endpoint, so clients in any
//! environment reach the same broker instance.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use soak_env::{Environment, SharedBase};
use tracing::{debug, info};

use crate::broker::MemoryBroker;
use crate::control::{ServerControl, ServerFactory, ServerLaunch};
use crate::error::{ServerError, ServerResult};

/// Setting that delays readiness, in milliseconds.
pub const STARTUP_DELAY_SETTING: &str = "startup_delay_ms";

// ---------------------------------------------------------------------------
// MemoryServerFactory
// ---------------------------------------------------------------------------

/// Launches [`MemoryServer`]s.
#[derive(Debug, Default, Clone)]
pub struct MemoryServerFactory {
    startup_delay: Option<Duration>,
}

impl MemoryServerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay readiness for every server this factory launches. A launch
    /// setting of the same name takes precedence.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = Some(delay);
        self
    }
}

#[async_trait]
impl ServerFactory for MemoryServerFactory {
    async fn launch(
        &self,
        launch: &ServerLaunch,
        env: &Environment,
    ) -> ServerResult<Box<dyn ServerControl>> {
        let data_dir = launch.root_dir.join("data");
        create_dir(&data_dir)?;

        let endpoint = launch.endpoint();
        let broker = if launch.persistent {
            let journal = launch.root_dir.join("journal");
            create_dir(&journal)?;
            MemoryBroker::with_journal(endpoint.clone(), journal)
        } else {
            MemoryBroker::new(endpoint.clone())
        };
        let broker = Arc::new(broker);

        let base = env.shared_handle();
        if let Some(existing) = base.object::<MemoryBroker>(&endpoint) {
            if existing.is_running() {
                return Err(ServerError::Launch {
                    version: env.tag().to_string(),
                    reason: format!("endpoint {endpoint} is already bound"),
                });
            }
        }
        base.register_object(endpoint.clone(), Arc::clone(&broker));

        let ready = Arc::new(AtomicBool::new(false));
        let delay = launch
            .setting_u64(STARTUP_DELAY_SETTING)
            .map(Duration::from_millis)
            .or(self.startup_delay);
        match delay {
            None => ready.store(true, Ordering::SeqCst),
            Some(delay) => {
                let handle = env.runtime_handle()?;
                let flag = Arc::clone(&ready);
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    flag.store(true, Ordering::SeqCst);
                });
            }
        }

        info!(
            version = %env.tag(),
            role = %launch.role,
            endpoint = %endpoint,
            persistent = launch.persistent,
            root = ?launch.root_dir,
            "memory server launched"
        );

        Ok(Box::new(MemoryServer {
            endpoint,
            broker,
            base,
            ready,
            stopped: AtomicBool::new(false),
        }))
    }
}

fn create_dir(path: &Path) -> ServerResult<()> {
    std::fs::create_dir_all(path).map_err(|source| ServerError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// MemoryServer
// ---------------------------------------------------------------------------

/// A running reference server.
pub struct MemoryServer {
    endpoint: String,
    broker: Arc<MemoryBroker>,
    base: Arc<SharedBase>,
    ready: Arc<AtomicBool>,
    stopped: AtomicBool,
}

impl MemoryServer {
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl ServerControl for MemoryServer {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn is_ready(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.ready.load(Ordering::SeqCst)
    }

    async fn stop(&self) -> ServerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, "memory server already stopped");
            return Ok(());
        }
        self.broker.shutdown();
        self.broker.stats().flush(&self.endpoint);

        // Only deregister our own broker; a later server may own the endpoint now.
        if let Some(current) = self.base.object::<MemoryBroker>(&self.endpoint) {
            if Arc::ptr_eq(&current, &self.broker) {
                self.base.remove_object(&self.endpoint);
            }
        }
        info!(endpoint = %self.endpoint, "memory server stopped");
        Ok(())
    }
}
