//! Generic node-tree data model
//!
//! Both declared document content and live protocol payloads are represented
//! as [`NodeList`]s of [`Node`]s carrying dynamically typed [`Value`]s.

pub mod node;
pub mod value;

pub use node::{Node, NodeList, Properties, is_directive, is_hidden, is_valid_name};
pub use half::f16;
pub use value::{Value, ValueKind};
