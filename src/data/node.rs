//! Named, ordered node trees
//!
//! A [`Node`] carries a name, a [`Value`], string properties and an ordered
//! list of children. [`NodeList`] is the ordered container used for document
//! templates and live protocol content; duplicate names are allowed and lookup
//! returns the first match.
//!
//! Names beginning with `.` mark hidden metadata that structural comparison and
//! "visible" views ignore. Property keys beginning with `/` are match
//! directives rather than application data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::value::Value;

/// Prefix marking an endpoint declaration.
pub const ENDPOINT_MARKER: char = '@';

/// Prefix marking hidden metadata.
pub const HIDDEN_MARKER: char = '.';

/// Prefix marking a reserved match directive property.
pub const DIRECTIVE_MARKER: char = '/';

/// Check a node name against the grammar
/// `[@.]? letter (letter | digit | '_' | '-')*`.
pub fn is_valid_name(name: &str) -> bool {
    let body = name
        .strip_prefix(ENDPOINT_MARKER)
        .or_else(|| name.strip_prefix(HIDDEN_MARKER))
        .unwrap_or(name);
    let mut chars = body.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Whether a node name or property key denotes hidden metadata.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with(HIDDEN_MARKER)
}

/// Whether a property key is a reserved match directive.
pub fn is_directive(key: &str) -> bool {
    key.starts_with(DIRECTIVE_MARKER)
}

/// Ordered string map with unique keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Create an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a property by exact key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a property ignoring ASCII case of the key.
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Keep only the entries matching the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Mutable access to values in insertion order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl From<Vec<(String, String)>> for Properties {
    fn from(entries: Vec<(String, String)>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Properties> for Vec<(String, String)> {
    fn from(props: Properties) -> Self {
        props.entries
    }
}

/// A named tree node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    /// Node name.
    pub name: String,

    /// Node value; [`Value::Empty`] when absent.
    #[serde(default, skip_serializing_if = "Value::is_empty")]
    pub value: Value,

    /// String properties.
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,

    /// Ordered children.
    #[serde(default, skip_serializing_if = "NodeList::is_empty")]
    pub children: NodeList,
}

impl Node {
    /// Create a node without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create a node carrying a value.
    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Builder-style property setter.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Builder-style child appender.
    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Builder-style children setter.
    pub fn children(mut self, children: impl Into<NodeList>) -> Self {
        self.children = children.into();
        self
    }

    /// Whether the node carries a value.
    pub fn has_value(&self) -> bool {
        !self.value.is_empty()
    }

    /// Whether the node has children.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether this node is hidden metadata.
    pub fn is_hidden(&self) -> bool {
        is_hidden(&self.name)
    }

    /// Whether this node declares an endpoint.
    pub fn is_endpoint_declaration(&self) -> bool {
        self.name.starts_with(ENDPOINT_MARKER)
    }

    /// Text form of the value, empty when absent.
    pub fn text(&self) -> String {
        self.value.to_text()
    }

    /// Case-insensitive name comparison.
    pub fn name_is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Deep copy with hidden children and hidden properties removed.
    pub fn visible(&self) -> Node {
        let mut copy = Node {
            name: self.name.clone(),
            value: self.value.clone(),
            properties: self.properties.clone(),
            children: self.children.visible(),
        };
        copy.properties.retain(|key, _| !is_hidden(key));
        copy
    }

    /// Visit this node and all descendants depth-first, allowing mutation.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Node)) {
        visit(self);
        for child in self.children.iter_mut() {
            child.walk_mut(visit);
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.has_value() {
            write!(f, ": {}", self.value)?;
        }
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " ({})", props.join(", "))?;
        }
        if self.has_children() {
            write!(f, " {{{}}}", self.children)?;
        }
        Ok(())
    }
}

/// Ordered list of nodes permitting duplicate names.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeList {
    nodes: Vec<Node>,
}

impl NodeList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node.
    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Remove and return the node at `index`.
    pub fn remove(&mut self, index: usize) -> Node {
        self.nodes.remove(index)
    }

    /// First node with the given name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name_is(name))
    }

    /// Mutable access to the first node with the given name (case-insensitive).
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.name_is(name))
    }

    /// Value of the first node with the given name.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|node| &node.value).filter(|v| !v.is_empty())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    /// Iterate nodes mutably in order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Node> {
        self.nodes.iter_mut()
    }

    /// Borrow the nodes as a slice.
    pub fn as_slice(&self) -> &[Node] {
        &self.nodes
    }

    /// Deep copy with hidden nodes and hidden properties removed at every level.
    pub fn visible(&self) -> NodeList {
        self.nodes
            .iter()
            .filter(|node| !node.is_hidden())
            .map(Node::visible)
            .collect()
    }

    /// Immutable deep-copy projection that can be handed to concurrent readers.
    pub fn to_shared(&self) -> Arc<NodeList> {
        Arc::new(self.clone())
    }
}

impl fmt::Display for NodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.nodes.iter().map(Node::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

impl From<Vec<Node>> for NodeList {
    fn from(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

impl FromIterator<Node> for NodeList {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for NodeList {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeList {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
