//! soak-env: isolated per-version environments for compat-soak.
//!
//! Several versions of a product run side by side in one process. Each gets
//! an [`Environment`] with its own script catalog, bindings and worker
//! runtime, layered only on a [`SharedBase`]. Coordination primitives created
//! outside every environment are injected by reference through the
//! [`bridge`], and the driver observes progress with [`wait::await_equals`].
//!
//! ## Layer 0 - Isolation
//!
//! - [`manager`]    : `IsolationManager`, `ArtifactResolver`, `CatalogResolver`
//! - [`environment`]: `Environment`, `VersionArtifact`, `EnvironmentId`
//! - [`base`]       : `SharedBase` escape hatch for shared objects
//! - [`bridge`]     : `set_variable`, `evaluate`, `execute`, `get`
//! - [`script`]     : `Script`, `ScriptContext`, `ScriptCommand`
//! - [`value`]      : `Value`, `Counter`, `ResultHandle`, `Origin`
//! - [`latch`]      : `ReusableLatch`
//! - [`wait`]       : `WaitPolicy`, `await_equals`

pub mod base;
pub mod bridge;
pub mod environment;
pub mod error;
pub mod latch;
pub mod manager;
pub mod script;
pub mod tag;
pub mod value;
pub mod wait;

pub use base::{SharedBase, SharedView};
pub use environment::{Environment, EnvironmentId, VersionArtifact};
pub use error::{
    BridgeError, BridgeResult, EnvError, EnvResult, ScriptError, ScriptResult, WaitError,
};
pub use latch::ReusableLatch;
pub use manager::{ArtifactResolver, CatalogResolver, IsolationManager, ManagerConfig};
pub use script::{script_fn, Script, ScriptArgs, ScriptCatalog, ScriptCommand, ScriptContext, ScriptRef};
pub use tag::VersionTag;
pub use value::{Counter, Origin, ResultHandle, SharedObject, Value};
pub use wait::{await_equals, await_true, WaitPolicy};
