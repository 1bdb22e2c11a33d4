//! Error types for soak-server

use std::path::PathBuf;

use soak_env::{BridgeError, EnvError, WaitError};
use thiserror::Error;

/// Errors that can occur while controlling a server
#[derive(Error, Debug)]
pub enum ServerError {
    /// The version's artifact cannot host a server
    #[error("version {version} does not provide a server")]
    NoServerFactory { version: String },

    /// A server is already running in this environment
    #[error("a server is already running in environment {version}")]
    AlreadyRunning { version: String },

    /// The server could not be launched
    #[error("server launch failed in environment {version}: {reason}")]
    Launch { version: String, reason: String },

    /// The server never reported ready
    #[error("server in environment {version} did not become ready: {source}")]
    NotReady {
        version: String,
        #[source]
        source: WaitError,
    },

    /// The server failed while stopping
    #[error("server in environment {version} failed to stop: {reason}")]
    Stop { version: String, reason: String },

    /// Working directory could not be prepared
    #[error("cannot prepare server directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Environment unusable
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Binding server settings failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ServerError {
    /// Setup defects that must not be retried.
    pub fn is_configuration(&self) -> bool {
        match self {
            ServerError::NoServerFactory { .. } => true,
            ServerError::Env(e) => e.is_configuration(),
            _ => false,
        }
    }
}

/// Errors raised by the in-memory broker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker has been shut down
    #[error("broker at {endpoint} is not running")]
    NotRunning { endpoint: String },

    /// The subscription's broker went away
    #[error("subscription to {destination} was closed")]
    Closed { destination: String },

    /// No message arrived in time
    #[error("no message on {destination} within {timeout_ms}ms")]
    Timeout { destination: String, timeout_ms: u64 },

    /// Journal write failed
    #[error("journal write failed: {0}")]
    Journal(#[from] std::io::Error),

    /// Journal encoding failed
    #[error("journal encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for server operations
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Result type for broker operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
