//! Parley – a scriptable, step-controllable protocol interaction test harness
//!
//! A document declares named endpoints, each backed by a transport plugin,
//! and an ordered sequence of interactions: outbound messages, inbound
//! message expectations and commands. The engine replays that sequence one
//! interaction at a time under operator control and verifies received
//! content against declarative patterns.
//!
//! This crate provides:
//! - A dynamically typed node-tree data model ([`data`]) shared by document
//!   templates and live protocol content
//! - Document construction into an immutable interaction flow ([`script`])
//! - Plugin contracts and an explicit plugin registry ([`plugin`])
//! - A step-gated execution engine with run, step, pause and stop ([`runtime`])
//! - A structural matcher with regex and relational overrides ([`matcher`])

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Node trees and dynamically typed values
pub mod data;

/// Structural matching of expected patterns against actual content
pub mod matcher;

/// Plugin contracts, registry and built-in plugins
pub mod plugin;

/// Execution engine and configuration
pub mod runtime;

/// Documents, interaction flows and template expansion
pub mod script;

// Re-export key types for convenience
pub use data::{Node, NodeList, Value};
pub use runtime::{Engine, EngineConfig, EngineState, EngineStatus, StepReport};
pub use script::{Document, FlowAction};

/// Current version of parley
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
