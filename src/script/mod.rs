//! Documents and template data
//!
//! A document is the top-level [`NodeList`](crate::data::NodeList) declaring
//! endpoints and interactions. [`Document::build`] turns it into the immutable
//! flow the engine replays; [`expand`] substitutes `${...}` references in
//! template data just before dispatch.

pub mod document;
pub mod expand;

pub use document::{
    ActionKind, CommandAction, DEFAULT_ENGINE_NAME, Document, ENGINE_PLUGIN, EndpointDecl,
    EngineDecl, FlowAction, MessageAction, Route,
};
pub use expand::{Bindings, expand_nodes, expand_text};
