//! Built-in plugins
//!
//! - `Dummy`: loopback endpoint. Every instance created from one
//!   [`DummyPlugin`] shares a wire; `send` enqueues content under the message
//!   name and `receive` takes the oldest queued content of that name, waiting
//!   until one arrives.
//! - `Delay`: sleeps for the `Duration` child of its content.
//! - `Log`: logs its content and echoes it back.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{
    CommandPlugin, CorrelationId, EndpointInstance, EndpointPlugin, PluginError, PluginResult,
};
use crate::data::NodeList;

#[derive(Default)]
struct Wire {
    queues: Mutex<HashMap<String, VecDeque<NodeList>>>,
    arrived: Notify,
}

impl Wire {
    fn push(&self, message: &str, content: NodeList) {
        self.queues
            .lock()
            .entry(message.to_ascii_lowercase())
            .or_default()
            .push_back(content);
        self.arrived.notify_waiters();
    }

    fn take(&self, message: &str) -> Option<NodeList> {
        self.queues
            .lock()
            .get_mut(&message.to_ascii_lowercase())
            .and_then(VecDeque::pop_front)
    }

    fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

/// Loopback endpoint plugin registered as `Dummy`.
#[derive(Default, Clone)]
pub struct DummyPlugin {
    wire: Arc<Wire>,
}

impl DummyPlugin {
    /// Plugin with a fresh, empty wire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages sent but not yet received.
    pub fn pending(&self) -> usize {
        self.wire.pending()
    }
}

impl EndpointPlugin for DummyPlugin {
    fn identifier(&self) -> &str {
        "Dummy"
    }

    fn create_instance(&self, config: &NodeList) -> PluginResult<Box<dyn EndpointInstance>> {
        Ok(Box::new(DummyEndpoint {
            config: config.clone(),
            wire: Arc::clone(&self.wire),
        }))
    }
}

struct DummyEndpoint {
    config: NodeList,
    wire: Arc<Wire>,
}

#[async_trait]
impl EndpointInstance for DummyEndpoint {
    async fn start(&self, cancel: CancellationToken) -> PluginResult<()> {
        if cancel.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        Ok(())
    }

    async fn send(
        &self,
        correlation: CorrelationId,
        message: &str,
        content: NodeList,
        _cancel: CancellationToken,
    ) -> PluginResult<NodeList> {
        tracing::debug!(%correlation, message, "dummy send");
        self.wire.push(message, content);
        Ok(NodeList::new())
    }

    async fn receive(
        &self,
        correlation: CorrelationId,
        message: &str,
        _content: NodeList,
        cancel: CancellationToken,
    ) -> PluginResult<(String, NodeList)> {
        loop {
            let notified = self.wire.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(content) = self.wire.take(message) {
                tracing::debug!(%correlation, message, "dummy receive");
                return Ok((message.to_string(), content));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PluginError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    fn describe(&self) -> NodeList {
        self.config.clone()
    }
}

/// Command registered as `Delay`: waits for the `Duration` child of its content.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayCommand;

#[async_trait]
impl CommandPlugin for DelayCommand {
    fn identifier(&self) -> &str {
        "Delay"
    }

    async fn execute(
        &self,
        content: NodeList,
        cancel: CancellationToken,
    ) -> PluginResult<NodeList> {
        let value = content
            .value_of("Duration")
            .ok_or_else(|| PluginError::InvalidContent("missing Duration".into()))?;
        let period = value
            .as_duration()
            .and_then(|span| span.to_std().ok())
            .ok_or_else(|| PluginError::InvalidContent(format!("bad Duration '{value}'")))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(PluginError::Cancelled),
            _ = tokio::time::sleep(period) => Ok(content),
        }
    }
}

/// Command registered as `Log`: emits its content through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCommand;

#[async_trait]
impl CommandPlugin for LogCommand {
    fn identifier(&self) -> &str {
        "Log"
    }

    async fn execute(
        &self,
        content: NodeList,
        _cancel: CancellationToken,
    ) -> PluginResult<NodeList> {
        tracing::info!(target: "parley::log", "{}", content);
        Ok(content)
    }
}
