//! soak-server: server lifecycle control for compat-soak.
//!
//! The broker is an external collaborator reached through [`ServerFactory`]
//! and [`ServerControl`]. [`ServerLifecycle`] starts one server per
//! environment in a freshly cleared directory and returns only once it is
//! ready. [`MemoryServer`] is the reference implementation, backed by the
//! multicast [`MemoryBroker`].

pub mod broker;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod stats;

pub use broker::{MemoryBroker, Message, Subscription};
pub use control::{
    ArtifactServerExt, ServerCapability, ServerControl, ServerFactory, ServerHandle, ServerLaunch,
    ServerRole, DEFAULT_ENDPOINT, SERVER_CAPABILITY,
};
pub use error::{BrokerError, BrokerResult, ServerError, ServerResult};
pub use lifecycle::{clear_directory, ServerLifecycle, PERSISTENT_BINDING, ROLE_BINDING};
pub use memory::{MemoryServer, MemoryServerFactory, STARTUP_DELAY_SETTING};
pub use stats::BrokerStats;
