//! Comparators derived from `/op` match directives

use regex::Regex;
use std::fmt;

use crate::data::{Node, Value};

/// Property key selecting the comparator for a pattern node.
pub const OP_DIRECTIVE: &str = "/op";

/// Relational operator applied to numeric forms of both values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl RelOp {
    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "eq" => Some(RelOp::Eq),
            "ne" => Some(RelOp::Ne),
            "lt" => Some(RelOp::Lt),
            "le" => Some(RelOp::Le),
            "gt" => Some(RelOp::Gt),
            "ge" => Some(RelOp::Ge),
            _ => None,
        }
    }

    fn apply(self, actual: f64, expected: f64) -> bool {
        match self {
            RelOp::Eq => actual == expected,
            RelOp::Ne => actual != expected,
            RelOp::Lt => actual < expected,
            RelOp::Le => actual <= expected,
            RelOp::Gt => actual > expected,
            RelOp::Ge => actual >= expected,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelOp::Eq => "eq",
            RelOp::Ne => "ne",
            RelOp::Lt => "lt",
            RelOp::Le => "le",
            RelOp::Gt => "gt",
            RelOp::Ge => "ge",
        };
        f.write_str(name)
    }
}

/// Value comparator derived once per pattern node.
#[derive(Debug, Clone)]
pub enum Comparator {
    /// Candidate text must match the expected value as a regular expression.
    Regex(Regex),
    /// `candidate <op> expected` over 64-bit floats; false if either side is not numeric.
    Relational(RelOp),
    /// Byte-exact when either side is binary, otherwise exact text equality.
    Exact,
}

impl Comparator {
    /// Derive the comparator for an expected node from its `/op` property.
    pub fn for_node(node: &Node) -> Result<Self, String> {
        let Some(op) = node.properties.get_ignore_case(OP_DIRECTIVE) else {
            return Ok(Comparator::Exact);
        };

        if op.eq_ignore_ascii_case("regex") {
            let pattern = node.value.to_text();
            return Regex::new(&pattern)
                .map(Comparator::Regex)
                .map_err(|err| format!("invalid regex '{pattern}': {err}"));
        }

        RelOp::parse(op)
            .map(Comparator::Relational)
            .ok_or_else(|| format!("unknown operator '{op}'"))
    }

    /// Compare a candidate value against the expected one. Both must be present.
    pub fn accepts(&self, expected: &Value, actual: &Value) -> bool {
        match self {
            Comparator::Regex(regex) => regex.is_match(&actual.to_text()),
            Comparator::Relational(op) => match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(e)) => op.apply(a, e),
                _ => false,
            },
            Comparator::Exact => {
                if expected.is_binary() || actual.is_binary() {
                    match (expected.as_bytes(), actual.as_bytes()) {
                        (Some(e), Some(a)) => e == a,
                        _ => false,
                    }
                } else {
                    expected.to_text() == actual.to_text()
                }
            }
        }
    }
}
