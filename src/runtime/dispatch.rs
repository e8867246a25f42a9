//! Executing one interaction
//!
//! Resolves the correlation identifier, expands template data, invokes the
//! plugin under its deadline and, for inbound messages, validates the
//! received content. Every outcome, including a panic inside the plugin,
//! ends up in the returned [`StepReport`].

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::EngineConfig;
use super::gate::StepGate;
use super::report::{Failure, FailureKind, StepReport};
use crate::data::NodeList;
use crate::matcher::{MatchOutcome, try_validate};
use crate::plugin::{CorrelationId, EndpointInstance, PluginError, PluginResult};
use crate::script::{Bindings, FlowAction, MessageAction, expand_nodes};

/// Correlation identifiers minted or reused during the current pass.
#[derive(Debug, Default)]
pub(crate) struct PassState {
    correlations: Vec<Option<CorrelationId>>,
}

impl PassState {
    pub(crate) fn reset(&mut self, len: usize) {
        self.correlations.clear();
        self.correlations.resize(len, None);
    }

    fn resolve(&mut self, index: usize, message: &MessageAction) -> CorrelationId {
        let reused = message
            .correlation_source
            .and_then(|source| self.correlations.get(source).copied().flatten());
        let id = reused.unwrap_or_else(Uuid::new_v4);
        if let Some(slot) = self.correlations.get_mut(index) {
            *slot = Some(id);
        }
        id
    }
}

/// What a dispatch needs from the engine.
pub(crate) struct Dispatcher<'a> {
    pub endpoints: &'a [Arc<dyn EndpointInstance>],
    pub config: &'a EngineConfig,
    pub gate: &'a StepGate,
}

impl Dispatcher<'_> {
    pub(crate) async fn run(
        &self,
        pass: &mut PassState,
        index: usize,
        action: &FlowAction,
        flow_index: u64,
        step_index: usize,
    ) -> StepReport {
        let started_at = Utc::now();
        let clock = Instant::now();

        let correlation = action.message().map(|message| pass.resolve(index, message));
        let bindings = self.bindings(flow_index, step_index, correlation);
        let content = expand_nodes(action.template(), &bindings);

        tracing::debug!(
            flow_index,
            step_index,
            action = %action,
            correlation = ?correlation,
            "dispatching interaction"
        );

        let mut failures = Vec::new();
        let result = match action {
            FlowAction::Command(command) => {
                let plugin = Arc::clone(&command.plugin);
                self.guarded(self.config.command_timeout, |cancel| async move {
                    plugin.execute(content, cancel).await
                })
                .await
            }
            FlowAction::MessageOut(message) => {
                let endpoint = self.endpoint(message.target);
                let id = correlation.unwrap_or_default();
                let name = message.message.as_str();
                self.guarded(self.config.send_timeout, |cancel| async move {
                    endpoint?.send(id, name, content, cancel).await
                })
                .await
            }
            FlowAction::MessageIn(message) => {
                let endpoint = self.endpoint(message.target);
                let id = correlation.unwrap_or_default();
                let name = message.message.as_str();
                let expected = content.clone();
                let received = self
                    .guarded(self.config.receive_timeout, |cancel| async move {
                        endpoint?.receive(id, name, expected, cancel).await
                    })
                    .await;
                received.map(|(received_name, received)| {
                    if !received_name.eq_ignore_ascii_case(name) {
                        failures.push(Failure::warning(
                            FailureKind::UnexpectedMessage,
                            format!("expected '{name}', received '{received_name}'"),
                        ));
                    }
                    if !content.is_empty() {
                        if let MatchOutcome::Failed(err) = try_validate(&content, &received) {
                            failures.push(err.into());
                        }
                    }
                    received
                })
            }
        };

        let result = result.unwrap_or_else(|failure| {
            failures.push(failure);
            NodeList::new()
        });

        for failure in &failures {
            tracing::warn!(
                flow_index,
                step_index,
                action = %action,
                kind = ?failure.kind,
                severity = ?failure.severity,
                "{}",
                failure.message
            );
        }

        StepReport {
            flow_index,
            step_index,
            action: action.to_string(),
            kind: action.kind(),
            correlation,
            started_at,
            elapsed: clock.elapsed(),
            result,
            failures,
        }
    }

    fn endpoint(&self, index: usize) -> PluginResult<Arc<dyn EndpointInstance>> {
        self.endpoints
            .get(index)
            .cloned()
            .ok_or_else(|| PluginError::failed(format!("no endpoint instance at {index}")))
    }

    fn bindings(
        &self,
        flow_index: u64,
        step_index: usize,
        correlation: Option<CorrelationId>,
    ) -> Bindings {
        let mut bindings: Bindings = self
            .config
            .variables
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        bindings.insert("FlowIndex".into(), flow_index.to_string());
        bindings.insert("StepIndex".into(), step_index.to_string());
        if let Some(id) = correlation {
            bindings.insert("CorrelationId".into(), id.to_string());
        }
        bindings
    }

    /// Run a plugin call with its own cancellation token and deadline.
    ///
    /// On expiry the token is cancelled and the call is still awaited; the
    /// engine never abandons a plugin future.
    async fn guarded<T, F, Fut>(&self, deadline: Duration, call: F) -> Result<T, Failure>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = PluginResult<T>>,
    {
        let token = self.gate.call_token();
        let fut = AssertUnwindSafe(call(token.clone())).catch_unwind();
        tokio::pin!(fut);

        let mut timed_out = false;
        let outcome = match tokio::time::timeout(deadline, &mut fut).await {
            Ok(outcome) => outcome,
            Err(_) => {
                timed_out = true;
                token.cancel();
                fut.await
            }
        };

        match outcome {
            Err(panic) => Err(Failure::error(
                FailureKind::Internal,
                format!("plugin panicked: {}", panic_message(panic.as_ref())),
            )),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) if timed_out => Err(Failure::timeout(deadline)),
            Ok(Err(err)) => Err(err.into()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
