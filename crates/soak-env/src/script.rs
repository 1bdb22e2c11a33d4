//! Workload scripts and the context they run in.
//!
//! A script is logic the harness does not own. It is resolved by logical id
//! inside one environment, receives positional string arguments, and returns
//! a [`ResultHandle`]. Long-running work is spawned onto the environment's
//! own runtime through [`ScriptContext::spawn`].

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::base::SharedView;
use crate::environment::{Environment, EnvironmentId};
use crate::error::{ScriptError, ScriptResult};
use crate::latch::ReusableLatch;
use crate::tag::VersionTag;
use crate::value::{Counter, Origin, ResultHandle, Value};

/// Logical script identity, e.g. `hqsoak/send_messages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptRef(String);

impl ScriptRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A typed command: run `script` with `args` in the environment for `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCommand {
    pub version: VersionTag,
    pub script: ScriptRef,
    pub args: Vec<String>,
}

impl ScriptCommand {
    pub fn new(version: VersionTag, script: impl Into<ScriptRef>) -> Self {
        Self {
            version,
            script: script.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }
}

/// Positional string arguments handed to a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptArgs(Vec<String>);

impl ScriptArgs {
    pub fn new(args: Vec<String>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The argument at `index` as text.
    pub fn text(&self, index: usize, name: &'static str) -> ScriptResult<&str> {
        self.0
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| ScriptError::InvalidArgument {
                index,
                name,
                reason: format!("missing ({} argument(s) given)", self.0.len()),
            })
    }

    /// The argument at `index` parsed as an integer.
    pub fn int(&self, index: usize, name: &'static str) -> ScriptResult<i64> {
        let raw = self.text(index, name)?;
        raw.trim()
            .parse::<i64>()
            .map_err(|e| ScriptError::InvalidArgument {
                index,
                name,
                reason: format!("{raw:?} is not an integer: {e}"),
            })
    }

    /// The argument at `index` parsed as a non-negative count.
    pub fn count(&self, index: usize, name: &'static str) -> ScriptResult<u64> {
        let n = self.int(index, name)?;
        u64::try_from(n).map_err(|_| ScriptError::InvalidArgument {
            index,
            name,
            reason: format!("{n} must not be negative"),
        })
    }
}

/// Workload logic runnable inside an environment.
pub trait Script: Send + Sync {
    /// Set up the workload and return its live result handle.
    ///
    /// Implementations must not block; background work goes through
    /// [`ScriptContext::spawn`].
    fn run(&self, ctx: &mut ScriptContext<'_>, args: &ScriptArgs) -> ScriptResult<ResultHandle>;
}

struct FnScript<F>(F);

impl<F> Script for FnScript<F>
where
    F: Fn(&mut ScriptContext<'_>, &ScriptArgs) -> ScriptResult<ResultHandle> + Send + Sync,
{
    fn run(&self, ctx: &mut ScriptContext<'_>, args: &ScriptArgs) -> ScriptResult<ResultHandle> {
        (self.0)(ctx, args)
    }
}

/// Wrap a closure as a [`Script`].
pub fn script_fn<F>(f: F) -> Arc<dyn Script>
where
    F: Fn(&mut ScriptContext<'_>, &ScriptArgs) -> ScriptResult<ResultHandle>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnScript(f))
}

/// A set of scripts keyed by logical id.
#[derive(Clone, Default)]
pub struct ScriptCatalog {
    scripts: HashMap<ScriptRef, Arc<dyn Script>>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<ScriptRef>, script: Arc<dyn Script>) {
        self.scripts.insert(id.into(), script);
    }

    pub fn with_script(mut self, id: impl Into<ScriptRef>, script: Arc<dyn Script>) -> Self {
        self.insert(id, script);
        self
    }

    pub fn get(&self, id: &ScriptRef) -> Option<Arc<dyn Script>> {
        self.scripts.get(id).cloned()
    }

    pub fn contains(&self, id: &ScriptRef) -> bool {
        self.scripts.contains_key(id)
    }

    /// Script ids, sorted.
    pub fn ids(&self) -> Vec<ScriptRef> {
        let mut ids: Vec<ScriptRef> = self.scripts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl std::fmt::Debug for ScriptCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCatalog")
            .field("scripts", &self.ids())
            .finish()
    }
}

/// The view of its environment a script gets while it runs.
pub struct ScriptContext<'a> {
    env: &'a Environment,
    script: &'a ScriptRef,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(env: &'a Environment, script: &'a ScriptRef) -> Self {
        Self { env, script }
    }

    pub fn tag(&self) -> &VersionTag {
        self.env.tag()
    }

    pub fn environment_id(&self) -> EnvironmentId {
        self.env.id()
    }

    pub fn script(&self) -> &ScriptRef {
        self.script
    }

    /// Lookup-only access to the shared base.
    pub fn shared(&self) -> SharedView<'_> {
        self.env.shared().view()
    }

    /// A binding, if present.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.env.binding(name)
    }

    /// A required binding.
    pub fn get(&self, name: &str) -> ScriptResult<Value> {
        self.lookup(name).ok_or_else(|| ScriptError::MissingBinding {
            name: name.to_string(),
        })
    }

    /// A required latch binding.
    pub fn latch(&self, name: &str) -> ScriptResult<ReusableLatch> {
        match self.get(name)? {
            Value::Latch(latch) => Ok(latch),
            other => Err(wrong_type(name, "latch", &other)),
        }
    }

    /// A required integer binding.
    pub fn int(&self, name: &str) -> ScriptResult<i64> {
        match self.get(name)? {
            Value::Int(n) => Ok(n),
            other => Err(wrong_type(name, "int", &other)),
        }
    }

    /// An optional integer binding with a default.
    pub fn int_or(&self, name: &str, default: i64) -> ScriptResult<i64> {
        match self.lookup(name) {
            None => Ok(default),
            Some(Value::Int(n)) => Ok(n),
            Some(other) => Err(wrong_type(name, "int", &other)),
        }
    }

    /// An optional text binding.
    pub fn text(&self, name: &str) -> ScriptResult<Option<String>> {
        match self.lookup(name) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(other) => Err(wrong_type(name, "text", &other)),
        }
    }

    /// Resolve an object by name: first this environment's bindings, then
    /// the shared base.
    pub fn object<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.lookup(name) {
            Some(Value::Object(obj)) => obj.downcast::<T>(),
            _ => self.shared().object::<T>(name),
        }
    }

    /// Bind a value in this environment so later statements can read it.
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> ScriptResult<()> {
        let value = value.into();
        if let Some(Origin::Environment(owner)) = value.origin() {
            if owner != self.env.id() {
                return Err(ScriptError::ForeignReference {
                    name: name.to_string(),
                    owner,
                });
            }
        }
        self.env.bind(name, value);
        Ok(())
    }

    /// A counter owned by this environment.
    pub fn counter(&self) -> Counter {
        Counter::with_origin(0, Origin::Environment(self.env.id()))
    }

    /// A latch owned by this environment.
    pub fn new_latch(&self, count: u64) -> ReusableLatch {
        ReusableLatch::with_origin(count, Origin::Environment(self.env.id()))
    }

    /// Spawn background work on this environment's runtime.
    pub fn spawn<F>(&self, future: F) -> ScriptResult<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self
            .env
            .runtime_handle()
            .map_err(|e| ScriptError::Failed(e.to_string()))?;
        Ok(handle.spawn(future))
    }
}

fn wrong_type(name: &str, expected: &'static str, found: &Value) -> ScriptError {
    ScriptError::WrongBindingType {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}
