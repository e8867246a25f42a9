//! Execution engine and public control API
//!
//! An [`Engine`] owns one background run loop (a tokio task), the
//! [`StepGate`] through which controllers steer it, and the live endpoint
//! instances. Controllers call [`Engine::start`], [`Engine::step`],
//! [`Engine::pause`] and [`Engine::stop`]; these only adjust the step budget
//! or wait on the gate and never preempt an interaction in flight.
//!
//! Run loop, once per iteration:
//! 1. exit if shutdown was requested;
//! 2. mark an interaction in flight and try to take one step from the budget;
//!    on success advance the counters and dispatch the next interaction, then
//!    mark the loop safe again whatever the dispatch outcome;
//! 3. otherwise clear the running flag if set, or sleep until the budget
//!    changes or the poll interval elapses.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod report;

use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::data::{Node, NodeList};
use crate::plugin::{Catalogue, EndpointInstance, PluginRegistry};
use crate::script::{Document, FlowAction};
use dispatch::{Dispatcher, PassState};

pub use config::{EngineConfig, load_config, write_config};
pub use error::{BuildError, ConfigError, Result, RuntimeError};
pub use gate::{GateStatus, StepGate, UNBOUNDED};
pub use report::{Failure, FailureKind, Severity, StepReport};

/// Coarse engine state derived from the gate and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// Nothing has executed yet and no run is in progress.
    Idle,
    /// A run is in progress.
    Running,
    /// The budget is exhausted after at least one interaction.
    Paused,
    /// A stop is waiting for the in-flight interaction.
    Stopping,
    /// The run loop has been shut down.
    Terminated,
}

/// Snapshot of the engine's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Coarse state.
    pub state: EngineState,
    /// Current pass, starting at 1; 0 before the first interaction.
    pub flow_index: u64,
    /// Position within the current pass, starting at 1.
    pub step_index: usize,
    /// Whether a run is in progress.
    pub is_running: bool,
    /// Remaining step budget; `None` when unbounded.
    pub remaining_steps: Option<u64>,
}

/// Counters written only by the run loop.
#[derive(Debug, Default)]
struct Counters {
    flow_index: AtomicU64,
    step_index: AtomicUsize,
}

struct Shared {
    document: Document,
    actions: Arc<[FlowAction]>,
    config: EngineConfig,
    catalogue: Catalogue,
    gate: StepGate,
    counters: Counters,
    endpoints: Vec<Arc<dyn EndpointInstance>>,
    started: Mutex<Vec<bool>>,
    stopping: AtomicBool,
    reports: broadcast::Sender<StepReport>,
    history: SyncMutex<VecDeque<StepReport>>,
}

/// A running interaction engine
///
/// Must be constructed inside a tokio runtime, which hosts the run loop.
/// Dropping the engine cancels the loop; [`Engine::shutdown`] additionally
/// waits for it and shuts started endpoints down.
pub struct Engine {
    shared: Arc<Shared>,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build the document from its nodes and create an engine for it.
    pub fn from_nodes(
        nodes: &NodeList,
        registry: &PluginRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        let document = Document::build(nodes, registry)?;
        Self::new(document, registry, config)
    }

    /// Create an engine for a constructed document.
    ///
    /// `config` is overlaid with the document's engine endpoint settings.
    /// Endpoint instances are created here but not started.
    pub fn new(
        document: Document,
        registry: &PluginRegistry,
        mut config: EngineConfig,
    ) -> Result<Self> {
        config.apply_document(document.engine())?;
        Self::with_config(document, registry, config)
    }

    /// Create an engine using `config` exactly as given, for callers that
    /// layer the document's engine settings themselves.
    pub fn with_config(
        document: Document,
        registry: &PluginRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| RuntimeError::NoAsyncRuntime)?;

        let endpoints = document
            .endpoints()
            .iter()
            .map(|decl| {
                decl.plugin
                    .create_instance(&decl.config)
                    .map(Arc::from)
                    .map_err(|err| BuildError::InvalidConfiguration {
                        owner: decl.name.clone(),
                        detail: err.to_string(),
                    })
            })
            .collect::<std::result::Result<Vec<Arc<dyn EndpointInstance>>, BuildError>>()?;

        let (reports, _) = broadcast::channel(config.history_limit.max(16));
        let shared = Arc::new(Shared {
            actions: document.shared_actions(),
            started: Mutex::new(vec![false; endpoints.len()]),
            catalogue: registry.catalogue(),
            document,
            config,
            gate: StepGate::new(),
            counters: Counters::default(),
            endpoints,
            stopping: AtomicBool::new(false),
            reports,
            history: SyncMutex::new(VecDeque::new()),
        });

        let task = handle.spawn(run_loop(Arc::clone(&shared)));
        tracing::debug!(
            endpoints = shared.endpoints.len(),
            actions = shared.actions.len(),
            "engine constructed"
        );

        Ok(Self {
            shared,
            task: SyncMutex::new(Some(task)),
        })
    }

    /// Start endpoints if needed and run freely.
    pub async fn start(&self) -> Result<()> {
        self.ensure_started().await?;
        self.shared.gate.set_budget(UNBOUNDED);
        tracing::info!("run started");
        Ok(())
    }

    /// Start endpoints if needed and allow exactly one interaction.
    ///
    /// Returns without waiting for the interaction to finish.
    pub async fn step(&self) -> Result<()> {
        self.ensure_started().await?;
        self.shared.gate.set_budget(1);
        tracing::debug!("single step requested");
        Ok(())
    }

    /// Exhaust the budget; an interaction in flight still completes.
    pub fn pause(&self) {
        self.shared.gate.set_budget(0);
        tracing::info!("run paused");
    }

    /// Exhaust the budget and wait until no interaction is in flight.
    pub async fn stop(&self) {
        let shared = &self.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        shared.gate.set_budget(0);
        shared.gate.wait_safe().await;
        shared.stopping.store(false, Ordering::SeqCst);
        tracing::info!(
            flow_index = shared.counters.flow_index.load(Ordering::SeqCst),
            step_index = shared.counters.step_index.load(Ordering::SeqCst),
            "run stopped"
        );
    }

    /// Wait until the budget is exhausted and the loop is safe.
    ///
    /// Never returns during an unbounded run unless the run ends because of
    /// the repeat count or shutdown.
    pub async fn wait_until_idle(&self) {
        self.shared
            .gate
            .wait_idle(self.shared.config.poll_interval)
            .await;
    }

    /// Cancel the run loop, wait for it, and shut started endpoints down.
    pub async fn shutdown(&self) {
        self.shared.gate.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "run loop ended abnormally");
            }
        }

        let started = self.shared.started.lock().await;
        for (endpoint, started) in self.shared.endpoints.iter().zip(started.iter()) {
            if *started {
                endpoint.shutdown().await;
            }
        }
        tracing::info!("engine shut down");
    }

    async fn ensure_started(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.gate.is_cancelled() {
            return Err(RuntimeError::Terminated);
        }

        let mut started = shared.started.lock().await;
        for (index, endpoint) in shared.endpoints.iter().enumerate() {
            if started[index] {
                continue;
            }
            let name = &shared.document.endpoints()[index].name;
            if let Err(err) = endpoint.start(shared.gate.call_token()).await {
                tracing::error!(endpoint = %name, error = %err, "endpoint failed to start");
                return Err(err.into());
            }
            started[index] = true;
            tracing::info!(endpoint = %name, "endpoint started");
        }
        Ok(())
    }

    /// Observable state.
    pub fn status(&self) -> EngineStatus {
        let shared = &self.shared;
        let gate = shared.gate.status();
        let flow_index = shared.counters.flow_index.load(Ordering::SeqCst);
        let state = if shared.gate.is_cancelled() {
            EngineState::Terminated
        } else if shared.stopping.load(Ordering::SeqCst) {
            EngineState::Stopping
        } else if gate.running || gate.in_flight && !shared.gate.is_exhausted() {
            EngineState::Running
        } else if flow_index == 0 {
            EngineState::Idle
        } else {
            EngineState::Paused
        };

        EngineStatus {
            state,
            flow_index,
            step_index: shared.counters.step_index.load(Ordering::SeqCst),
            is_running: gate.running,
            remaining_steps: shared.gate.remaining(),
        }
    }

    /// Current pass, starting at 1.
    pub fn flow_index(&self) -> u64 {
        self.shared.counters.flow_index.load(Ordering::SeqCst)
    }

    /// Position within the current pass, starting at 1.
    pub fn step_index(&self) -> usize {
        self.shared.counters.step_index.load(Ordering::SeqCst)
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.shared.gate.status().running
    }

    /// Subscribe to step reports as they are produced.
    pub fn subscribe(&self) -> broadcast::Receiver<StepReport> {
        self.shared.reports.subscribe()
    }

    /// Most recent step reports, oldest first.
    pub fn reports(&self) -> Vec<StepReport> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// The constructed document.
    pub fn document(&self) -> &Document {
        &self.shared.document
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Plugin identifiers available when the engine was built.
    pub fn catalogue(&self) -> &Catalogue {
        &self.shared.catalogue
    }

    /// An endpoint's declaration, with configuration taken from the live instance.
    pub fn endpoint_node(&self, name: &str) -> Option<Node> {
        let document = &self.shared.document;
        if document.engine().name.eq_ignore_ascii_case(name) {
            return Some(self.self_node());
        }
        let (index, decl) = document.endpoint(name)?;
        let mut node = decl.to_node();
        node.children = self.shared.endpoints[index].describe();
        Some(node)
    }

    /// The engine's own endpoint with its effective settings.
    pub fn self_node(&self) -> Node {
        self.shared
            .config
            .to_node(&self.shared.document.engine().name)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.gate.cancel();
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let gate = &shared.gate;
    let dispatcher = Dispatcher {
        endpoints: &shared.endpoints,
        config: &shared.config,
        gate,
    };
    let mut pass = PassState::default();

    while !gate.is_cancelled() {
        gate.update(|s| s.in_flight = true);
        if gate.try_take() {
            gate.update(|s| s.running = true);
            match advance(&shared) {
                Some((flow_index, step_index)) => {
                    if step_index == 1 {
                        pass.reset(shared.actions.len());
                    }
                    let index = step_index - 1;
                    let report = dispatcher
                        .run(&mut pass, index, &shared.actions[index], flow_index, step_index)
                        .await;
                    record(&shared, report);
                    tokio::task::yield_now().await;
                }
                None => gate.set_budget(0),
            }
            // the next iteration ends the run if the budget is gone
            gate.update(|s| s.in_flight = false);
            continue;
        }

        let was_running = gate.status().running;
        gate.update(|s| {
            s.in_flight = false;
            s.running = false;
        });
        if was_running {
            tracing::info!(
                flow_index = shared.counters.flow_index.load(Ordering::SeqCst),
                step_index = shared.counters.step_index.load(Ordering::SeqCst),
                "run ended"
            );
        } else {
            gate.idle(shared.config.poll_interval).await;
        }
    }

    gate.update(|s| *s = GateStatus::default());
    tracing::debug!("run loop exited");
}

/// Move to the next interaction, or `None` when the flow is empty or the
/// configured number of passes is complete.
fn advance(shared: &Shared) -> Option<(u64, usize)> {
    let len = shared.actions.len();
    if len == 0 {
        return None;
    }
    let counters = &shared.counters;
    let flow = counters.flow_index.load(Ordering::SeqCst);
    let step = counters.step_index.load(Ordering::SeqCst);

    let (flow, step) = if flow == 0 || step >= len {
        (flow + 1, 1)
    } else {
        (flow, step + 1)
    };

    let repeat = shared.config.repeat_count;
    if repeat > 0 && flow > repeat {
        return None;
    }

    counters.flow_index.store(flow, Ordering::SeqCst);
    counters.step_index.store(step, Ordering::SeqCst);
    Some((flow, step))
}

fn record(shared: &Shared, report: StepReport) {
    {
        let mut history = shared.history.lock();
        while history.len() >= shared.config.history_limit.max(1) {
            history.pop_front();
        }
        history.push_back(report.clone());
    }
    // no subscribers is fine
    let _ = shared.reports.send(report);
}
