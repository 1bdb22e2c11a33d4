//! Error types for the environment layer.

use crate::environment::EnvironmentId;

/// Configuration-level failures: an environment cannot be built or used.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("invalid version tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("artifacts for version {tag} could not be resolved: {reason}")]
    ArtifactUnresolved { tag: String, reason: String },

    #[error("environment {tag} ({id}) has been released")]
    Released { tag: String, id: EnvironmentId },

    #[error("failed to start worker runtime for environment {tag}: {source}")]
    Runtime {
        tag: String,
        #[source]
        source: std::io::Error,
    },
}

impl EnvError {
    /// Configuration errors are environment-setup defects and are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EnvError::InvalidTag { .. } | EnvError::ArtifactUnresolved { .. }
        )
    }
}

/// Errors surfaced by the variable bridge (`set`, `eval`, `exec`).
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("script {script} is not resolvable in environment {tag}")]
    ScriptNotFound { tag: String, script: String },

    #[error("variable {name} is not bound in environment {tag}")]
    VariableNotFound { tag: String, name: String },

    #[error("invalid variable name {0:?}")]
    InvalidName(String),

    #[error("invalid statement {statement:?}: {reason}")]
    InvalidStatement { statement: String, reason: String },

    #[error("variable {name} in environment {tag} is {found}, expected {expected}")]
    UnexpectedType {
        tag: String,
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value for {name} was created inside environment {owner} and cannot be injected into {tag}")]
    ForeignReference {
        tag: String,
        name: String,
        owner: EnvironmentId,
    },

    #[error("script {script} failed in environment {tag}: {source}")]
    Script {
        tag: String,
        script: String,
        #[source]
        source: ScriptError,
    },

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Errors raised by a workload script while it sets itself up.
///
/// Failures inside the work a script spawns are tallied by the script, not
/// returned here.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("argument {index} ({name}): {reason}")]
    InvalidArgument {
        index: usize,
        name: &'static str,
        reason: String,
    },

    #[error("required binding {name} is missing")]
    MissingBinding { name: String },

    #[error("binding {name} is {found}, expected {expected}")]
    WrongBindingType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value for {name} was created inside environment {owner} and cannot be bound here")]
    ForeignReference { name: String, owner: EnvironmentId },

    #[error("{0}")]
    Failed(String),
}

/// Bounded polling failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WaitError {
    #[error("condition not met after {elapsed_ms}ms: expected {expected}, last observed {last}")]
    Timeout {
        expected: String,
        last: String,
        elapsed_ms: u64,
    },
}

/// Result type for environment operations.
pub type EnvResult<T> = std::result::Result<T, EnvError>;

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type for script setup.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;
