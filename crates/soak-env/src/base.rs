//! The shared base layer every environment resolves against.
//!
//! It is the only place where objects can legitimately cross environment
//! boundaries: coordination primitives and registered objects created here
//! are stamped [`Origin::Shared`] and may be bound into any environment.
//!
//! Only the driver side registers objects. Scripts see the base through a
//! [`SharedView`], which offers lookups and nothing else.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::latch::ReusableLatch;
use crate::script::{Script, ScriptCatalog, ScriptRef};
use crate::value::{Counter, Origin, SharedObject};

/// Shared scripts and objects visible from every environment.
#[derive(Debug, Default)]
pub struct SharedBase {
    scripts: RwLock<ScriptCatalog>,
    objects: RwLock<HashMap<String, SharedObject>>,
}

impl SharedBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a utility script resolvable from every environment after its
    /// own catalog.
    pub fn register_script(&self, id: impl Into<ScriptRef>, script: Arc<dyn Script>) {
        self.scripts.write().unwrap().insert(id, script);
    }

    pub fn script(&self, id: &ScriptRef) -> Option<Arc<dyn Script>> {
        self.scripts.read().unwrap().get(id)
    }

    /// Register an object created outside every environment so it can be
    /// passed by reference into any of them. Replaces an earlier object with
    /// the same name.
    pub fn register_object<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        object: Arc<T>,
    ) -> SharedObject {
        let name = name.into();
        let shared = SharedObject::new(object, Origin::Shared);
        debug!(name = %name, object_type = shared.type_name(), "registered shared object");
        self.objects.write().unwrap().insert(name, shared.clone());
        shared
    }

    /// Remove a registered object. Returns whether it was present.
    pub fn remove_object(&self, name: &str) -> bool {
        self.objects.write().unwrap().remove(name).is_some()
    }

    pub fn object_handle(&self, name: &str) -> Option<SharedObject> {
        self.objects.read().unwrap().get(name).cloned()
    }

    /// A registered object as its concrete type.
    pub fn object<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.object_handle(name).and_then(|o| o.downcast::<T>())
    }

    /// Lookup-only access for code running inside an environment.
    pub fn view(&self) -> SharedView<'_> {
        SharedView { base: self }
    }

    /// A latch created in the shared base.
    pub fn latch(&self, count: u64) -> ReusableLatch {
        ReusableLatch::new(count)
    }

    /// A counter created in the shared base.
    pub fn counter(&self, initial: i64) -> Counter {
        Counter::new(initial)
    }
}

/// Read-only view of a [`SharedBase`].
///
/// Nothing reachable from a view can add to the base:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use soak_env::SharedBase;
///
/// let base = SharedBase::new();
/// base.view().register_object("leaked", Arc::new(1u8));
/// ```
#[derive(Clone, Copy)]
pub struct SharedView<'a> {
    base: &'a SharedBase,
}

impl<'a> SharedView<'a> {
    pub fn script(&self, id: &ScriptRef) -> Option<Arc<dyn Script>> {
        self.base.script(id)
    }

    pub fn object_handle(&self, name: &str) -> Option<SharedObject> {
        self.base.object_handle(name)
    }

    pub fn object<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.base.object::<T>(name)
    }
}

impl std::fmt::Debug for SharedView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedView").finish_non_exhaustive()
    }
}
