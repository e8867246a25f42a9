//! Error types for the parley engine
//!
//! Domain errors use thiserror, one enum per failure domain, with
//! conversions into [`RuntimeError`] at the engine boundary. Per-interaction
//! failures never appear here; they are recorded as
//! [`Failure`](super::report::Failure)s on the step report.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::matcher::ValidationError;
pub use crate::plugin::PluginError;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Document construction failed
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// A plugin failed outside any interaction, e.g. during endpoint start
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine was constructed outside a tokio runtime
    #[error("No tokio runtime available to host the run loop")]
    NoAsyncRuntime,

    /// A control call was made after shutdown
    #[error("Engine has been shut down")]
    Terminated,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Construction errors; always raised before anything executes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A top-level node name does not follow the name grammar
    #[error("Invalid name '{0}'")]
    InvalidName(String),

    /// Two endpoints share a name (case-insensitive)
    #[error("Endpoint '{0}' declared more than once")]
    DuplicateEndpoint(String),

    /// An interaction references an undeclared endpoint
    #[error("Interaction '{action}' references unknown endpoint '{endpoint}'")]
    UnknownEndpoint {
        /// Interaction name
        action: String,
        /// Unresolved endpoint name
        endpoint: String,
    },

    /// No plugin is registered under the identifier
    #[error("No plugin registered as '{plugin}' (needed by '{owner}')")]
    UnknownPlugin {
        /// Endpoint or interaction requiring the plugin
        owner: String,
        /// Missing plugin identifier
        plugin: String,
    },

    /// Arrow notation does not resolve to two distinct endpoints
    #[error("Interaction '{action}' has invalid route '{route}': {detail}")]
    InvalidArrow {
        /// Interaction name
        action: String,
        /// Route text as written
        route: String,
        /// What is wrong with it
        detail: String,
    },

    /// The endpoint whose plugin would be invoked is the engine itself
    #[error("Interaction '{action}' would dispatch to the engine endpoint '{endpoint}'")]
    SelfEndpoint {
        /// Interaction name
        action: String,
        /// Self endpoint name
        endpoint: String,
    },

    /// Endpoint or engine configuration is malformed
    #[error("Invalid configuration for '{owner}': {detail}")]
    InvalidConfiguration {
        /// Declaration carrying the configuration
        owner: String,
        /// What is wrong with it
        detail: String,
    },
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for document construction
pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
