//! Integration tests for engine control
//!
//! Drives complete documents through start, step, pause and stop using the
//! built-in loopback endpoint and commands.

use async_trait::async_trait;
use chrono::TimeDelta;
use parley::data::{Node, NodeList, Value};
use parley::plugin::{
    CommandPlugin, CorrelationId, EndpointInstance, EndpointPlugin, PluginCatalog, PluginError,
    PluginRegistry, PluginResult,
};
use parley::runtime::{
    BuildError, Engine, EngineConfig, EngineState, FailureKind, RuntimeError, Severity,
};
use std::sync::{Arc, Once};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn quick_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(10),
        receive_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

fn engine(nodes: Vec<Node>, config: EngineConfig) -> Engine {
    Engine::from_nodes(&nodes.into(), &PluginRegistry::with_builtins(), config).unwrap()
}

fn ping_pong() -> Vec<Node> {
    vec![
        Node::with_value("@Me", "Dummy"),
        Node::with_value("@Peer", "Dummy").child(Node::with_value("Host", "peer.test")),
        Node::with_value("Ping", "Me>Peer")
            .child(Node::with_value("Seq", 7i32))
            .child(Node::with_value("From", "${Realm:-lab}")),
        Node::with_value("Ping", "Me<Peer")
            .child(Node::with_value("Seq", 5i32).property("/op", "ge"))
            .child(Node::with_value("From", "^l.b$").property("/op", "regex")),
    ]
}

fn delay(name: &str, millis: i64) -> Node {
    Node::with_value(name, "Delay").child(Node::with_value(
        "Duration",
        TimeDelta::milliseconds(millis),
    ))
}

async fn settle(engine: &Engine) {
    tokio::time::timeout(Duration::from_secs(5), engine.wait_until_idle())
        .await
        .expect("engine did not become idle");
}

#[tokio::test]
async fn test_send_then_receive_over_loopback() {
    let engine = engine(ping_pong(), quick_config());
    assert_eq!(engine.status().state, EngineState::Idle);
    assert_eq!(engine.flow_index(), 0);

    engine.step().await.unwrap();
    settle(&engine).await;
    assert_eq!((engine.flow_index(), engine.step_index()), (1, 1));
    assert_eq!(engine.status().state, EngineState::Paused);

    engine.step().await.unwrap();
    settle(&engine).await;
    assert_eq!((engine.flow_index(), engine.step_index()), (1, 2));

    let reports = engine.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.passed()), "{reports:#?}");
    assert_eq!(reports[0].correlation, reports[1].correlation);

    let received = &reports[1].result;
    assert_eq!(received.get("Seq").unwrap().value.as_i64(), Some(7));
    assert_eq!(received.get("From").unwrap().text(), "lab");

    engine.shutdown().await;
    assert_eq!(engine.status().state, EngineState::Terminated);
}

#[tokio::test]
async fn test_mismatched_content_is_reported_not_fatal() {
    let mut nodes = ping_pong();
    nodes[3] = Node::with_value("Ping", "Me<Peer").child(Node::with_value("Seq", 8i32));
    nodes.push(Node::new("Log"));
    let engine = engine(nodes, quick_config());

    for _ in 0..3 {
        engine.step().await.unwrap();
        settle(&engine).await;
    }

    let reports = engine.reports();
    assert_eq!(reports.len(), 3);
    assert!(!reports[1].passed());
    assert_eq!(reports[1].failures[0].kind, FailureKind::Validation);
    assert_eq!(reports[1].failures[0].expected.as_ref().unwrap().name, "Seq");
    assert!(reports[2].passed());
}

#[tokio::test]
async fn test_receive_timeout_lets_the_run_continue() {
    let nodes = vec![
        Node::with_value("@Me", "Dummy"),
        Node::with_value("Never", "Me<"),
        Node::new("Log"),
    ];
    let config = EngineConfig {
        receive_timeout: Duration::from_millis(50),
        repeat_count: 1,
        ..quick_config()
    };
    let engine = engine(nodes, config);

    engine.start().await.unwrap();
    settle(&engine).await;

    let reports = engine.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].failures[0].kind, FailureKind::Timeout);
    assert!(reports[1].passed());
}

#[tokio::test]
async fn test_step_executes_exactly_one_interaction() {
    let nodes = vec![Node::new("Log"), Node::new("Log"), Node::new("Log")];
    let engine = engine(nodes, quick_config());

    engine.step().await.unwrap();
    settle(&engine).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.reports().len(), 1);
    assert_eq!(engine.step_index(), 1);
    let status = engine.status();
    assert_eq!(status.remaining_steps, Some(0));
    assert!(!status.is_running);
}

#[tokio::test]
async fn test_budget_stays_exhausted_without_a_controller() {
    let engine = engine(vec![Node::new("Log"), Node::new("Log")], quick_config());

    engine.step().await.unwrap();
    settle(&engine).await;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(15)).await;
        let status = engine.status();
        assert_eq!(status.remaining_steps, Some(0));
        assert_eq!(status.step_index, 1);
    }
}

#[tokio::test]
async fn test_stop_waits_for_the_interaction_in_flight() {
    let nodes = vec![delay("First", 200), delay("Second", 200), delay("Third", 200)];
    let engine = engine(nodes, quick_config());

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.is_running());

    engine.stop().await;
    let reports = engine.reports();
    assert_eq!(reports.len(), 1, "in-flight interaction must finish before stop returns");
    assert!(reports[0].passed());
    assert!(!engine.is_running());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.reports().len(), 1);
    assert_eq!(engine.status().state, EngineState::Paused);
}

#[tokio::test]
async fn test_pause_then_resume_continues_where_it_left_off() {
    let nodes = vec![delay("A", 60), delay("B", 60), delay("C", 60)];
    let engine = engine(nodes, EngineConfig { repeat_count: 1, ..quick_config() });

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.pause();
    settle(&engine).await;
    let paused_at = engine.step_index();
    assert!(paused_at >= 1);

    engine.start().await.unwrap();
    settle(&engine).await;
    assert_eq!(engine.step_index(), 3);
    assert_eq!(engine.reports().len(), 3);
}

#[tokio::test]
async fn test_repeat_count_limits_a_free_run() {
    let engine = engine(
        vec![Node::new("Log"), Node::new("Log")],
        EngineConfig { repeat_count: 2, ..quick_config() },
    );

    engine.start().await.unwrap();
    settle(&engine).await;

    assert_eq!(engine.reports().len(), 4);
    assert_eq!((engine.flow_index(), engine.step_index()), (2, 2));
    assert!(!engine.is_running());

    // the configured passes are complete; a further start is a no-op
    engine.start().await.unwrap();
    settle(&engine).await;
    assert_eq!(engine.reports().len(), 4);
}

#[tokio::test]
async fn test_flow_index_advances_between_passes() {
    let engine = engine(vec![Node::new("Log")], quick_config());
    let mut reports = engine.subscribe();

    for _ in 0..3 {
        engine.step().await.unwrap();
        settle(&engine).await;
    }

    let flows: Vec<u64> = (0..3)
        .map(|_| reports.try_recv().unwrap().flow_index)
        .collect();
    assert_eq!(flows, vec![1, 2, 3]);
    assert_eq!(engine.step_index(), 1);
}

#[tokio::test]
async fn test_empty_flow_ends_immediately() {
    let engine = engine(vec![Node::with_value("@Me", "Dummy")], quick_config());
    engine.start().await.unwrap();
    settle(&engine).await;

    assert!(engine.reports().is_empty());
    assert_eq!(engine.status().state, EngineState::Idle);
}

#[tokio::test]
async fn test_document_settings_reach_the_engine() {
    let mut nodes = ping_pong();
    nodes.insert(
        0,
        Node::with_value("@Tester", "Engine")
            .child(Node::with_value("RepeatCount", 3i32))
            .child(Node::new("Variables").child(Node::with_value("Realm", "lab"))),
    );
    let engine = engine(nodes, quick_config());

    assert_eq!(engine.config().repeat_count, 3);
    let own = engine.endpoint_node("tester").unwrap();
    assert_eq!(own.children.value_of("RepeatCount").and_then(|v| v.as_u64()), Some(3));

    let peer = engine.endpoint_node("Peer").unwrap();
    assert_eq!(peer.children.get("Host").unwrap().text(), "peer.test");
    assert!(engine.endpoint_node("Nobody").is_none());
    assert!(engine.catalogue().endpoints.iter().any(|id| id == "Dummy"));
}

#[test]
fn test_construction_requires_async_runtime() {
    let nodes: NodeList = vec![Node::new("Log")].into();
    let result = Engine::from_nodes(&nodes, &PluginRegistry::with_builtins(), EngineConfig::default());
    assert!(matches!(result, Err(RuntimeError::NoAsyncRuntime)));
}

#[tokio::test]
async fn test_construction_surfaces_document_errors() {
    let nodes: NodeList = vec![Node::with_value("Ping", "Me>Nobody")].into();
    let result = Engine::from_nodes(&nodes, &PluginRegistry::with_builtins(), EngineConfig::default());
    assert!(matches!(
        result,
        Err(RuntimeError::Build(BuildError::UnknownEndpoint { .. }))
    ));
}

#[tokio::test]
async fn test_control_after_shutdown_is_rejected() {
    let engine = engine(vec![Node::new("Log")], quick_config());
    engine.shutdown().await;

    assert!(matches!(engine.start().await, Err(RuntimeError::Terminated)));
    assert!(matches!(engine.step().await, Err(RuntimeError::Terminated)));
}

struct Counted {
    starts: Arc<AtomicUsize>,
}

impl EndpointPlugin for Counted {
    fn identifier(&self) -> &str {
        "Counted"
    }

    fn create_instance(&self, _config: &NodeList) -> PluginResult<Box<dyn EndpointInstance>> {
        Ok(Box::new(CountedEndpoint {
            starts: Arc::clone(&self.starts),
        }))
    }
}

struct CountedEndpoint {
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl EndpointInstance for CountedEndpoint {
    async fn start(&self, _cancel: CancellationToken) -> PluginResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(())
    }

    async fn send(
        &self,
        _correlation: CorrelationId,
        _message: &str,
        _content: NodeList,
        _cancel: CancellationToken,
    ) -> PluginResult<NodeList> {
        Ok(NodeList::new())
    }

    async fn receive(
        &self,
        _correlation: CorrelationId,
        message: &str,
        _content: NodeList,
        _cancel: CancellationToken,
    ) -> PluginResult<(String, NodeList)> {
        Err(PluginError::Unsupported(message.to_string()))
    }

    fn describe(&self) -> NodeList {
        NodeList::new()
    }
}

#[tokio::test]
async fn test_endpoints_start_once_under_concurrent_control() {
    let starts = Arc::new(AtomicUsize::new(0));
    let registry = PluginRegistry::new().with_endpoint(Counted {
        starts: Arc::clone(&starts),
    });
    let nodes: NodeList = vec![
        Node::with_value("@A", "Counted"),
        Node::with_value("@B", "Counted"),
        Node::with_value("Hello", ">A"),
    ]
    .into();
    let engine = Arc::new(Engine::from_nodes(&nodes, &registry, quick_config()).unwrap());

    let controllers: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    engine.step().await
                } else {
                    engine.start().await
                }
            })
        })
        .collect();
    for controller in controllers {
        controller.await.unwrap().unwrap();
    }
    engine.stop().await;

    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

/// Answers every receive with a `Pong` carrying `Seq = 7`.
struct Renaming;

impl EndpointPlugin for Renaming {
    fn identifier(&self) -> &str {
        "Renaming"
    }

    fn create_instance(&self, _config: &NodeList) -> PluginResult<Box<dyn EndpointInstance>> {
        Ok(Box::new(Renaming))
    }
}

#[async_trait]
impl EndpointInstance for Renaming {
    async fn start(&self, _cancel: CancellationToken) -> PluginResult<()> {
        Ok(())
    }

    async fn send(
        &self,
        _correlation: CorrelationId,
        _message: &str,
        content: NodeList,
        _cancel: CancellationToken,
    ) -> PluginResult<NodeList> {
        Ok(content)
    }

    async fn receive(
        &self,
        _correlation: CorrelationId,
        _message: &str,
        _content: NodeList,
        _cancel: CancellationToken,
    ) -> PluginResult<(String, NodeList)> {
        Ok(("Pong".to_string(), vec![Node::with_value("Seq", 7i32)].into()))
    }

    fn describe(&self) -> NodeList {
        NodeList::new()
    }
}

#[tokio::test]
async fn test_unexpected_message_name_is_a_warning() {
    let registry = PluginRegistry::new().with_endpoint(Renaming);
    let nodes: NodeList = vec![
        Node::with_value("@Me", "Renaming"),
        Node::with_value("Ping", "Me<").child(Node::with_value("Seq", 7i32)),
        Node::with_value("Ping", "Me<").child(Node::with_value("Seq", 9i32)),
        Node::with_value("pong", "Me<"),
    ]
    .into();
    let engine = Engine::from_nodes(&nodes, &registry, quick_config()).unwrap();

    for _ in 0..3 {
        engine.step().await.unwrap();
        settle(&engine).await;
    }
    let reports = engine.reports();
    assert_eq!(reports.len(), 3);

    // content still matched, so only the name is flagged
    assert!(reports[0].passed(), "{:#?}", reports[0]);
    assert_eq!(reports[0].failures.len(), 1);
    assert_eq!(reports[0].failures[0].severity, Severity::Warning);
    assert_eq!(reports[0].failures[0].kind, FailureKind::UnexpectedMessage);
    assert_eq!(reports[0].result.value_of("Seq"), Some(&Value::Int32(7)));

    let kinds: Vec<(Severity, FailureKind)> = reports[1]
        .failures
        .iter()
        .map(|failure| (failure.severity, failure.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (Severity::Warning, FailureKind::UnexpectedMessage),
            (Severity::Error, FailureKind::Validation),
        ]
    );
    assert!(!reports[1].passed());

    // names compare ignoring case
    assert!(reports[2].failures.is_empty());
}

#[tokio::test]
async fn test_status_reports_stopping_while_stop_waits() {
    let nodes = vec![delay("Slow", 300), delay("Never", 300)];
    let engine = Arc::new(engine(nodes, quick_config()));

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.status().state, EngineState::Running);

    let stopper = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    let status = engine.status();
    assert_eq!(status.state, EngineState::Stopping);
    assert_eq!(status.remaining_steps, Some(0));

    tokio::time::timeout(Duration::from_secs(5), stopper)
        .await
        .expect("stop did not return")
        .unwrap();
    assert_eq!(engine.status().state, EngineState::Paused);
    assert_eq!(engine.reports().len(), 1);
}

struct Marker;

#[async_trait]
impl CommandPlugin for Marker {
    fn identifier(&self) -> &str {
        "Marker"
    }

    async fn execute(&self, content: NodeList, _cancel: CancellationToken) -> PluginResult<NodeList> {
        Ok(content)
    }
}

static REGISTER: Once = Once::new();

fn register_test_plugins() {
    REGISTER.call_once(|| PluginCatalog::global().register_command(Marker));
}

#[tokio::test]
async fn test_globally_registered_command_is_usable() {
    register_test_plugins();
    let registry = PluginCatalog::global().snapshot();
    assert!(registry.has_command("marker"));

    let nodes: NodeList = vec![Node::new("Marker").child(Node::with_value("Tag", "${StepIndex}"))].into();
    let engine = Engine::from_nodes(&nodes, &registry, quick_config()).unwrap();
    engine.step().await.unwrap();
    settle(&engine).await;

    let reports = engine.reports();
    assert_eq!(reports[0].result.get("Tag").unwrap().text(), "1");
}
