//! Document construction
//!
//! Partitions a top-level [`NodeList`] into endpoint declarations and an
//! ordered [`FlowAction`] sequence, resolving every endpoint and plugin
//! reference against a [`PluginRegistry`]. Construction either fully succeeds
//! or fails with a [`BuildError`]; nothing is instantiated or started here.
//!
//! Top-level node forms:
//!
//! - `.name`: metadata, ignored.
//! - `@Name` with value `Plugin`: endpoint declaration, children are its
//!   configuration. The identifier `Engine` declares the engine's own
//!   endpoint instead; without one an implicit engine endpoint named `Local`
//!   exists.
//! - `Name` with value `A>B`: outbound message `Name` from `A` to `B`, sent
//!   through `B`.
//! - `Name` with value `A<B`: inbound message `Name` received at `B` from `A`,
//!   received through `A`.
//! - any other `Name`: command; the plugin is the value text, or `Name` when
//!   there is no value.
//!
//! An empty side of an arrow is the engine endpoint. Children of interaction
//! nodes are the template data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::data::{Node, NodeList, is_valid_name};
use crate::plugin::{CommandPlugin, EndpointPlugin, PluginRegistry};
use crate::runtime::error::{BuildError, BuildResult};

/// Plugin identifier declaring the engine's own endpoint.
pub const ENGINE_PLUGIN: &str = "Engine";

/// Name of the engine endpoint when the document declares none.
pub const DEFAULT_ENGINE_NAME: &str = "Local";

/// A declared, plugin-backed endpoint.
#[derive(Clone)]
pub struct EndpointDecl {
    /// Endpoint name without the `@` marker.
    pub name: String,
    /// Plugin identifier as written.
    pub plugin_id: String,
    /// Configuration subtree.
    pub config: NodeList,
    /// Resolved factory.
    pub plugin: Arc<dyn EndpointPlugin>,
}

impl EndpointDecl {
    /// Reconstruct the declaration node.
    pub fn to_node(&self) -> Node {
        declaration_node(&self.name, &self.plugin_id, self.config.clone())
    }
}

impl fmt::Debug for EndpointDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDecl")
            .field("name", &self.name)
            .field("plugin_id", &self.plugin_id)
            .field("config", &self.config)
            .finish()
    }
}

/// The engine's own endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDecl {
    /// Endpoint name without the `@` marker.
    pub name: String,
    /// Configuration subtree; see [`EngineConfig`](crate::runtime::EngineConfig).
    pub config: NodeList,
    /// Whether the document declared it explicitly.
    pub declared: bool,
}

impl EngineDecl {
    /// Reconstruct the declaration node.
    pub fn to_node(&self) -> Node {
        declaration_node(&self.name, ENGINE_PLUGIN, self.config.clone())
    }
}

fn declaration_node(name: &str, plugin_id: &str, config: NodeList) -> Node {
    Node::with_value(format!("@{name}"), plugin_id).children(config)
}

/// Either side of a message route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Route {
    /// The engine endpoint.
    Engine,
    /// Index into [`Document::endpoints`].
    Endpoint(usize),
}

/// Command invocation.
#[derive(Clone)]
pub struct CommandAction {
    /// Node name of the interaction.
    pub name: String,
    /// Plugin identifier as resolved.
    pub plugin_id: String,
    /// Resolved command.
    pub plugin: Arc<dyn CommandPlugin>,
    /// Template data.
    pub template: NodeList,
}

impl fmt::Debug for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandAction")
            .field("name", &self.name)
            .field("plugin_id", &self.plugin_id)
            .field("template", &self.template)
            .finish()
    }
}

/// Outbound or inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageAction {
    /// Message name.
    pub message: String,
    /// Endpoint whose plugin is invoked: the destination of an outbound
    /// message, the source of an inbound one.
    pub target: usize,
    /// The other side of the exchange.
    pub counterpart: Route,
    /// Route as normalised text, e.g. `Me>Peer`.
    pub route: String,
    /// Template data; for inbound messages the expected pattern.
    pub template: NodeList,
    /// Index of the earlier action whose correlation identifier this one reuses.
    pub correlation_source: Option<usize>,
}

/// One interaction of the flow.
#[derive(Debug, Clone)]
pub enum FlowAction {
    /// Side-effecting command.
    Command(CommandAction),
    /// Outbound message.
    MessageOut(MessageAction),
    /// Inbound message expectation.
    MessageIn(MessageAction),
}

/// Coarse classification of a [`FlowAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// [`FlowAction::Command`].
    Command,
    /// [`FlowAction::MessageOut`].
    Send,
    /// [`FlowAction::MessageIn`].
    Receive,
}

impl FlowAction {
    /// Interaction name.
    pub fn name(&self) -> &str {
        match self {
            FlowAction::Command(command) => &command.name,
            FlowAction::MessageOut(message) | FlowAction::MessageIn(message) => &message.message,
        }
    }

    /// Action kind.
    pub fn kind(&self) -> ActionKind {
        match self {
            FlowAction::Command(_) => ActionKind::Command,
            FlowAction::MessageOut(_) => ActionKind::Send,
            FlowAction::MessageIn(_) => ActionKind::Receive,
        }
    }

    /// Template data.
    pub fn template(&self) -> &NodeList {
        match self {
            FlowAction::Command(command) => &command.template,
            FlowAction::MessageOut(message) | FlowAction::MessageIn(message) => &message.template,
        }
    }

    /// Message payload, if this is a message action.
    pub fn message(&self) -> Option<&MessageAction> {
        match self {
            FlowAction::Command(_) => None,
            FlowAction::MessageOut(message) | FlowAction::MessageIn(message) => Some(message),
        }
    }

    /// Reconstruct the interaction node.
    pub fn to_node(&self) -> Node {
        let value = match self {
            FlowAction::Command(command) => command.plugin_id.clone(),
            FlowAction::MessageOut(message) | FlowAction::MessageIn(message) => {
                message.route.clone()
            }
        };
        Node::with_value(self.name(), value).children(self.template().clone())
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowAction::Command(command) => write!(f, "{} ({})", command.name, command.plugin_id),
            FlowAction::MessageOut(message) | FlowAction::MessageIn(message) => {
                write!(f, "{}: {}", message.message, message.route)
            }
        }
    }
}

/// A constructed document.
#[derive(Debug, Clone)]
pub struct Document {
    engine: EngineDecl,
    endpoints: Vec<EndpointDecl>,
    actions: Arc<[FlowAction]>,
}

impl Document {
    /// Build a document from its top-level nodes.
    pub fn build(nodes: &NodeList, registry: &PluginRegistry) -> BuildResult<Self> {
        let (engine, endpoints) = collect_endpoints(nodes, registry)?;
        let mut builder = FlowBuilder {
            engine: &engine,
            endpoints: &endpoints,
            registry,
            actions: Vec::new(),
            open: Vec::new(),
        };

        for node in nodes.iter() {
            if node.is_hidden() || node.is_endpoint_declaration() {
                continue;
            }
            builder.push(node)?;
        }

        let actions = builder.actions.into();
        Ok(Self {
            engine,
            endpoints,
            actions,
        })
    }

    /// The engine's own endpoint.
    pub fn engine(&self) -> &EngineDecl {
        &self.engine
    }

    /// Declared plugin-backed endpoints, in document order.
    pub fn endpoints(&self) -> &[EndpointDecl] {
        &self.endpoints
    }

    /// Find a plugin-backed endpoint by name (case-insensitive).
    pub fn endpoint(&self, name: &str) -> Option<(usize, &EndpointDecl)> {
        self.endpoints
            .iter()
            .enumerate()
            .find(|(_, decl)| decl.name.eq_ignore_ascii_case(name))
    }

    /// Interactions in document order.
    pub fn actions(&self) -> &[FlowAction] {
        &self.actions
    }

    /// Shared handle to the immutable interaction sequence.
    pub fn shared_actions(&self) -> Arc<[FlowAction]> {
        Arc::clone(&self.actions)
    }

    /// Name of a route side.
    pub fn route_name(&self, route: Route) -> &str {
        match route {
            Route::Engine => &self.engine.name,
            Route::Endpoint(index) => self
                .endpoints
                .get(index)
                .map_or(self.engine.name.as_str(), |decl| decl.name.as_str()),
        }
    }

    /// Reconstruct the top-level nodes.
    pub fn to_nodes(&self) -> NodeList {
        let mut nodes = NodeList::new();
        if self.engine.declared {
            nodes.push(self.engine.to_node());
        }
        for endpoint in &self.endpoints {
            nodes.push(endpoint.to_node());
        }
        for action in self.actions.iter() {
            nodes.push(action.to_node());
        }
        nodes
    }
}

fn collect_endpoints(
    nodes: &NodeList,
    registry: &PluginRegistry,
) -> BuildResult<(EngineDecl, Vec<EndpointDecl>)> {
    let mut engine: Option<EngineDecl> = None;
    let mut endpoints: Vec<EndpointDecl> = Vec::new();

    for node in nodes.iter() {
        if node.is_hidden() {
            continue;
        }
        if !is_valid_name(&node.name) {
            return Err(BuildError::InvalidName(node.name.clone()));
        }
        if !node.is_endpoint_declaration() {
            continue;
        }

        let name = node.name[1..].to_string();
        let plugin_id = node.text().trim().to_string();
        let duplicate = endpoints
            .iter()
            .any(|decl| decl.name.eq_ignore_ascii_case(&name))
            || engine
                .as_ref()
                .is_some_and(|decl| decl.name.eq_ignore_ascii_case(&name));
        if duplicate {
            return Err(BuildError::DuplicateEndpoint(name));
        }

        if plugin_id.is_empty() {
            return Err(BuildError::InvalidConfiguration {
                owner: name,
                detail: "missing plugin identifier".into(),
            });
        }

        if plugin_id.eq_ignore_ascii_case(ENGINE_PLUGIN) {
            if let Some(existing) = &engine {
                return Err(BuildError::InvalidConfiguration {
                    owner: name,
                    detail: format!("engine endpoint already declared as '{}'", existing.name),
                });
            }
            engine = Some(EngineDecl {
                name,
                config: node.children.clone(),
                declared: true,
            });
            continue;
        }

        let plugin = registry
            .endpoint(&plugin_id)
            .ok_or_else(|| BuildError::UnknownPlugin {
                owner: name.clone(),
                plugin: plugin_id.clone(),
            })?;
        endpoints.push(EndpointDecl {
            name,
            plugin_id,
            config: node.children.clone(),
            plugin,
        });
    }

    let engine = engine.unwrap_or_else(|| EngineDecl {
        name: DEFAULT_ENGINE_NAME.to_string(),
        config: NodeList::new(),
        declared: false,
    });
    Ok((engine, endpoints))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Out,
    In,
}

/// Message action still waiting for its counterpart.
struct OpenExchange {
    index: usize,
    direction: Direction,
    pair: (Route, Route),
}

struct FlowBuilder<'a> {
    engine: &'a EngineDecl,
    endpoints: &'a [EndpointDecl],
    registry: &'a PluginRegistry,
    actions: Vec<FlowAction>,
    open: Vec<OpenExchange>,
}

impl FlowBuilder<'_> {
    fn push(&mut self, node: &Node) -> BuildResult<()> {
        let text = node.text();
        let action = match text.find(['>', '<']) {
            Some(_) => self.message(node, &text)?,
            None => self.command(node, text.trim())?,
        };
        self.actions.push(action);
        Ok(())
    }

    fn command(&self, node: &Node, plugin_id: &str) -> BuildResult<FlowAction> {
        let plugin_id = if plugin_id.is_empty() {
            node.name.as_str()
        } else {
            plugin_id
        };
        let plugin = self
            .registry
            .command(plugin_id)
            .ok_or_else(|| BuildError::UnknownPlugin {
                owner: node.name.clone(),
                plugin: plugin_id.to_string(),
            })?;
        Ok(FlowAction::Command(CommandAction {
            name: node.name.clone(),
            plugin_id: plugin.identifier().to_string(),
            plugin,
            template: node.children.clone(),
        }))
    }

    fn message(&mut self, node: &Node, route: &str) -> BuildResult<FlowAction> {
        let invalid = |detail: &str| BuildError::InvalidArrow {
            action: node.name.clone(),
            route: route.to_string(),
            detail: detail.to_string(),
        };

        let arrows = route.matches(['>', '<']).count();
        if arrows != 1 {
            return Err(invalid("expected exactly one '>' or '<'"));
        }

        let (direction, left, right) = match route.split_once('>') {
            Some((left, right)) => (Direction::Out, left, right),
            None => match route.split_once('<') {
                Some((left, right)) => (Direction::In, left, right),
                None => return Err(invalid("expected exactly one '>' or '<'")),
            },
        };

        let left = self.resolve(node, left.trim())?;
        let right = self.resolve(node, right.trim())?;
        if left == right {
            return Err(invalid("both sides name the same endpoint"));
        }

        // A>B is sent through B; A<B is received through A.
        let (target, counterpart) = match direction {
            Direction::Out => (right, left),
            Direction::In => (left, right),
        };
        let Route::Endpoint(target) = target else {
            return Err(BuildError::SelfEndpoint {
                action: node.name.clone(),
                endpoint: self.engine.name.clone(),
            });
        };

        let separator = match direction {
            Direction::Out => '>',
            Direction::In => '<',
        };
        let route = format!(
            "{}{}{}",
            self.side_name(left),
            separator,
            self.side_name(right)
        );

        let correlation_source = self.pair(direction, (left, right));
        let payload = MessageAction {
            message: node.name.clone(),
            target,
            counterpart,
            route,
            template: node.children.clone(),
            correlation_source,
        };
        Ok(match direction {
            Direction::Out => FlowAction::MessageOut(payload),
            Direction::In => FlowAction::MessageIn(payload),
        })
    }

    fn resolve(&self, node: &Node, side: &str) -> BuildResult<Route> {
        if side.is_empty() {
            return Ok(Route::Engine);
        }
        if let Some(index) = self
            .endpoints
            .iter()
            .position(|decl| decl.name.eq_ignore_ascii_case(side))
        {
            return Ok(Route::Endpoint(index));
        }
        if self.engine.name.eq_ignore_ascii_case(side) {
            return Ok(Route::Engine);
        }
        Err(BuildError::UnknownEndpoint {
            action: node.name.clone(),
            endpoint: side.to_string(),
        })
    }

    fn side_name(&self, route: Route) -> &str {
        match route {
            Route::Engine => &self.engine.name,
            Route::Endpoint(index) => &self.endpoints[index].name,
        }
    }

    /// Pair with the most recent open exchange of the opposite direction over
    /// the same two endpoints, or open a new one.
    fn pair(&mut self, direction: Direction, sides: (Route, Route)) -> Option<usize> {
        let pair = if sides.0 <= sides.1 {
            sides
        } else {
            (sides.1, sides.0)
        };

        let matched = self
            .open
            .iter()
            .rposition(|open| open.direction != direction && open.pair == pair);

        match matched {
            Some(pos) => Some(self.open.remove(pos).index),
            None => {
                self.open.push(OpenExchange {
                    index: self.actions.len(),
                    direction,
                    pair,
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PluginRegistry {
        PluginRegistry::with_builtins()
    }

    fn two_peers() -> Vec<Node> {
        vec![
            Node::with_value("@Me", "Dummy"),
            Node::with_value("@Peer", "Dummy").child(Node::with_value("Host", "peer")),
        ]
    }

    fn doc(extra: Vec<Node>) -> BuildResult<Document> {
        let mut nodes = two_peers();
        nodes.extend(extra);
        Document::build(&nodes.into(), &registry())
    }

    #[test]
    fn test_partitions_endpoints_and_actions() {
        let document = doc(vec![
            Node::new(".comment"),
            Node::with_value("Ping", "Me>Peer").child(Node::with_value("Seq", 1i32)),
            Node::with_value("Ping", "Me<Peer"),
            Node::with_value("Pause", "Delay").child(Node::with_value("Duration", "PT1S")),
            Node::new("Log"),
        ])
        .unwrap();

        assert_eq!(document.endpoints().len(), 2);
        assert_eq!(document.engine().name, DEFAULT_ENGINE_NAME);
        let kinds: Vec<ActionKind> = document.actions().iter().map(FlowAction::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Send,
                ActionKind::Receive,
                ActionKind::Command,
                ActionKind::Command
            ]
        );

        let send = document.actions()[0].message().unwrap();
        assert_eq!(document.route_name(Route::Endpoint(send.target)), "Peer");
        let receive = document.actions()[1].message().unwrap();
        assert_eq!(document.route_name(Route::Endpoint(receive.target)), "Me");
    }

    #[test]
    fn test_response_reuses_request_correlation() {
        let document = doc(vec![
            Node::with_value("Request", "Me>Peer"),
            Node::with_value("Other", ">Peer"),
            Node::with_value("Answer", "Me<Peer"),
            Node::with_value("Again", "Peer<Me"),
        ])
        .unwrap();

        let sources: Vec<Option<usize>> = document
            .actions()
            .iter()
            .map(|action| action.message().and_then(|m| m.correlation_source))
            .collect();
        assert_eq!(sources, vec![None, None, Some(0), None]);
    }

    #[test]
    fn test_empty_side_is_engine_endpoint() {
        let document = doc(vec![Node::with_value("Hello", ">Peer")]).unwrap();
        let message = document.actions()[0].message().unwrap();
        assert_eq!(message.counterpart, Route::Engine);
        assert_eq!(message.route, "Local>Peer");

        let err = doc(vec![Node::with_value("Hello", "Peer>")]).unwrap_err();
        assert!(matches!(err, BuildError::SelfEndpoint { .. }));
    }

    #[test]
    fn test_declared_engine_endpoint_replaces_implicit_one() {
        let mut nodes = two_peers();
        nodes.push(Node::with_value("@Tester", "engine").child(Node::with_value("RepeatCount", 2i32)));
        nodes.push(Node::with_value("Hello", "Tester>Peer"));
        let document = Document::build(&nodes.into(), &registry()).unwrap();

        assert_eq!(document.engine().name, "Tester");
        assert!(document.engine().declared);
        assert_eq!(document.actions()[0].message().unwrap().counterpart, Route::Engine);
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            doc(vec![Node::with_value("Ping", "Me>Nobody")]),
            Err(BuildError::UnknownEndpoint { .. })
        ));
        assert!(matches!(
            doc(vec![Node::with_value("Ping", "Me>Me")]),
            Err(BuildError::InvalidArrow { .. })
        ));
        assert!(matches!(
            doc(vec![Node::with_value("Ping", "Me>Peer>Me")]),
            Err(BuildError::InvalidArrow { .. })
        ));
        assert!(matches!(
            doc(vec![Node::with_value("Go", "Teleport")]),
            Err(BuildError::UnknownPlugin { .. })
        ));
        assert!(matches!(
            doc(vec![Node::with_value("@me", "Dummy")]),
            Err(BuildError::DuplicateEndpoint(_))
        ));
        assert!(matches!(
            doc(vec![Node::with_value("@Radio", "Modem")]),
            Err(BuildError::UnknownPlugin { .. })
        ));
        assert!(matches!(
            doc(vec![Node::with_value("9lives", "Me>Peer")]),
            Err(BuildError::InvalidName(_))
        ));
    }

    #[test]
    fn test_round_trips_declarations() {
        let document = doc(vec![Node::with_value("Ping", "me>peer")]).unwrap();
        let nodes = document.to_nodes();
        assert_eq!(nodes.get("@Peer").unwrap(), &two_peers()[1]);
        assert_eq!(nodes.get("Ping").unwrap().text(), "Me>Peer");
    }
}
