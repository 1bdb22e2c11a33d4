//! Values that can be bound into an environment's evaluation context.
//!
//! Reference values (`Latch`, `Counter`, `Object`) carry an [`Origin`]. Only
//! values created outside every environment, or inside the target
//! environment itself, may be bound; see [`crate::bridge::set_variable`].

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::environment::EnvironmentId;
use crate::latch::ReusableLatch;

/// Where a reference value was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Created by the driver or the shared base, outside all environments.
    Shared,
    /// Created inside the given environment.
    Environment(EnvironmentId),
}

impl Origin {
    /// Whether a value with this origin may be bound into `target`.
    pub fn injectable_into(&self, target: EnvironmentId) -> bool {
        match self {
            Origin::Shared => true,
            Origin::Environment(owner) => *owner == target,
        }
    }
}

/// A shared integer counter. Clones refer to the same counter.
#[derive(Clone)]
pub struct Counter {
    value: Arc<AtomicI64>,
    origin: Origin,
}

impl Counter {
    /// A counter created outside every environment.
    pub fn new(initial: i64) -> Self {
        Self::with_origin(initial, Origin::Shared)
    }

    pub(crate) fn with_origin(initial: i64, origin: Origin) -> Self {
        Self {
            value: Arc::new(AtomicI64::new(initial)),
            origin,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Increment and return the new value.
    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    /// Decrement and return the new value.
    pub fn decrement(&self) -> i64 {
        self.add(-1)
    }

    /// Add `delta` and return the new value.
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn same_counter(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("value", &self.get())
            .field("origin", &self.origin)
            .finish()
    }
}

/// An opaque object passed by reference, e.g. a client connector.
#[derive(Clone)]
pub struct SharedObject {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    origin: Origin,
}

impl SharedObject {
    pub(crate) fn new<T: Any + Send + Sync>(object: Arc<T>, origin: Origin) -> Self {
        Self {
            inner: object,
            type_name: std::any::type_name::<T>(),
            origin,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recover the concrete object, if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedObject")
            .field("type", &self.type_name)
            .field("origin", &self.origin)
            .finish()
    }
}

/// A bindable value.
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Text(String),
    Latch(ReusableLatch),
    Counter(Counter),
    Object(SharedObject),
}

impl Value {
    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Latch(_) => "latch",
            Value::Counter(_) => "counter",
            Value::Object(_) => "object",
        }
    }

    /// Origin of reference values; `None` for plain data.
    pub fn origin(&self) -> Option<Origin> {
        match self {
            Value::Latch(l) => Some(l.origin()),
            Value::Counter(c) => Some(c.origin()),
            Value::Object(o) => Some(o.origin()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Counter(c) => Some(c.get()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<ReusableLatch> for Value {
    fn from(v: ReusableLatch) -> Self {
        Value::Latch(v)
    }
}

impl From<Counter> for Value {
    fn from(v: Counter) -> Self {
        Value::Counter(v)
    }
}

impl From<SharedObject> for Value {
    fn from(v: SharedObject) -> Self {
        Value::Object(v)
    }
}

/// What a script evaluation or statement execution hands back to the driver.
#[derive(Debug, Clone)]
pub enum ResultHandle {
    /// A live counter mutated by the script's background work.
    Counter(Counter),
    Void,
}

impl ResultHandle {
    /// Current value of the counter, `None` for void.
    pub fn get(&self) -> Option<i64> {
        match self {
            ResultHandle::Counter(c) => Some(c.get()),
            ResultHandle::Void => None,
        }
    }

    pub fn counter(&self) -> Option<&Counter> {
        match self {
            ResultHandle::Counter(c) => Some(c),
            ResultHandle::Void => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, ResultHandle::Void)
    }
}
