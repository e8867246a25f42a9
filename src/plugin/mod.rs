//! Plugin contracts
//!
//! Endpoints and commands are implemented outside the engine and resolved by
//! identifier through a [`PluginRegistry`]. An [`EndpointPlugin`] is a factory
//! producing live [`EndpointInstance`]s from a configuration subtree; a
//! [`CommandPlugin`] executes side effects directly. Every asynchronous
//! operation receives a [`CancellationToken`] and must observe it
//! cooperatively; the engine never aborts a call beyond cancelling its token.

pub mod builtin;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::data::NodeList;

pub use builtin::{DelayCommand, DummyPlugin, LogCommand};
pub use registry::{Catalogue, PluginCatalog, PluginRegistry};

/// Opaque identifier linking a request action to its paired response.
pub type CorrelationId = Uuid;

/// Result type for plugin operations.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Failures reported by plugin calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The operation failed.
    #[error("{0}")]
    Failed(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The plugin does not support the requested operation or message.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The supplied content or configuration is malformed.
    #[error("invalid content: {0}")]
    InvalidContent(String),
}

impl PluginError {
    /// Convenience constructor for [`PluginError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        PluginError::Failed(msg.into())
    }
}

/// Factory for endpoint instances, registered under a plugin identifier.
pub trait EndpointPlugin: Send + Sync {
    /// Identifier documents use to select this plugin.
    fn identifier(&self) -> &str;

    /// Create an instance from its configuration. Must not perform I/O.
    fn create_instance(&self, config: &NodeList) -> PluginResult<Box<dyn EndpointInstance>>;
}

/// A live endpoint.
///
/// The engine invokes the asynchronous operations from one task at a time;
/// [`EndpointInstance::describe`] may be called concurrently from elsewhere.
#[async_trait]
pub trait EndpointInstance: Send + Sync {
    /// Establish resources such as connections. Called exactly once.
    async fn start(&self, cancel: CancellationToken) -> PluginResult<()>;

    /// Send a message; the result may carry a transport acknowledgement.
    async fn send(
        &self,
        correlation: CorrelationId,
        message: &str,
        content: NodeList,
        cancel: CancellationToken,
    ) -> PluginResult<NodeList>;

    /// Receive a message, yielding the received name and content.
    async fn receive(
        &self,
        correlation: CorrelationId,
        message: &str,
        content: NodeList,
        cancel: CancellationToken,
    ) -> PluginResult<(String, NodeList)>;

    /// Effective configuration, for display and round-trip.
    fn describe(&self) -> NodeList;

    /// Release resources when the engine is torn down.
    async fn shutdown(&self) {}
}

/// A side-effecting command.
#[async_trait]
pub trait CommandPlugin: Send + Sync {
    /// Identifier documents use to select this command.
    fn identifier(&self) -> &str;

    /// Execute the command with expanded template content.
    async fn execute(&self, content: NodeList, cancel: CancellationToken)
    -> PluginResult<NodeList>;
}
