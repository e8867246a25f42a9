//! Structural matching of node trees
//!
//! Decides whether an actual [`NodeList`] satisfies an expected pattern list.
//! Hidden nodes and properties are stripped from both sides first. Expected
//! nodes are then placed in reverse declaration order, each on the first
//! compatible actual node scanning from the front; a placed actual node is
//! consumed and cannot satisfy a second expected node. When first-fit finds no
//! free candidate, earlier placements are shifted along alternating paths
//! before the expected node is declared unsatisfied, so the match succeeds
//! whenever any one-to-one placement exists.
//!
//! Compatibility of an (expected, actual) pair:
//! 1. names are equal ignoring case;
//! 2. both have a value or neither has;
//! 3. values agree under the expected node's [`Comparator`];
//! 4. every non-directive expected property exists on the actual node with a
//!    case-insensitively equal value;
//! 5. children either both absent or matched recursively by the same rules.

pub mod directive;

use std::cell::OnceCell;
use std::fmt;
use thiserror::Error;

use crate::data::{Node, NodeList, is_directive};
pub use directive::{Comparator, OP_DIRECTIVE, RelOp};

/// Why a particular expected node could not be satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    /// No actual node carries the expected name.
    NoCandidate,
    /// Every same-named candidate is already consumed by another expected node.
    Exhausted {
        /// Number of same-named candidates.
        candidates: usize,
    },
    /// One side has a value and the other does not.
    ValuePresence {
        /// Whether the expected node has a value.
        expected: bool,
    },
    /// Values differ under the node's comparator.
    Value {
        /// Expected value text.
        expected: String,
        /// Actual value text.
        actual: String,
    },
    /// A required property is missing or differs.
    Property {
        /// Property key.
        key: String,
        /// Expected property value.
        expected: String,
        /// Actual property value, if present.
        actual: Option<String>,
    },
    /// One side has children and the other does not.
    ChildrenPresence {
        /// Whether the expected node has children.
        expected: bool,
    },
    /// A nested expected child was not satisfied.
    Child {
        /// The unsatisfied child pattern.
        witness: Box<Node>,
        /// Why it failed.
        reason: Box<Mismatch>,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::NoCandidate => write!(f, "no node with that name"),
            Mismatch::Exhausted { candidates } => {
                write!(f, "all {candidates} same-named nodes already matched")
            }
            Mismatch::ValuePresence { expected: true } => write!(f, "value missing"),
            Mismatch::ValuePresence { expected: false } => write!(f, "unexpected value"),
            Mismatch::Value { expected, actual } => {
                write!(f, "value '{actual}' does not satisfy '{expected}'")
            }
            Mismatch::Property {
                key,
                expected,
                actual: Some(actual),
            } => write!(f, "property '{key}' is '{actual}', expected '{expected}'"),
            Mismatch::Property {
                key, actual: None, ..
            } => write!(f, "property '{key}' missing"),
            Mismatch::ChildrenPresence { expected: true } => write!(f, "children missing"),
            Mismatch::ChildrenPresence { expected: false } => write!(f, "unexpected children"),
            Mismatch::Child { witness, reason } => {
                write!(f, "child '{}': {}", witness.name, reason)
            }
        }
    }
}

/// Validation failure.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// An expected node has no compatible actual node.
    #[error("expected '{}' not satisfied: {reason}", expected.name)]
    Mismatch {
        /// First unsatisfied expected node (hidden fields stripped).
        expected: Box<Node>,
        /// Why it could not be satisfied.
        reason: Mismatch,
    },

    /// A `/op` directive could not be compiled.
    #[error("invalid match directive on '{node}': {detail}")]
    InvalidDirective {
        /// Name of the offending node.
        node: String,
        /// Compilation error.
        detail: String,
    },
}

impl ValidationError {
    /// The expected node this failure is about, when there is one.
    pub fn witness(&self) -> Option<&Node> {
        match self {
            ValidationError::Mismatch { expected, .. } => Some(expected),
            ValidationError::InvalidDirective { .. } => None,
        }
    }
}

/// Result of [`try_validate`].
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// Every expected node was satisfied by a distinct actual node.
    Matched {
        /// Number of top-level actual nodes consumed.
        consumed: usize,
    },
    /// Matching failed.
    Failed(ValidationError),
}

impl MatchOutcome {
    /// Whether the match succeeded.
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<usize, ValidationError> {
        match self {
            MatchOutcome::Matched { consumed } => Ok(consumed),
            MatchOutcome::Failed(err) => Err(err),
        }
    }
}

/// Match and return the failure as an error.
pub fn validate(expected: &NodeList, actual: &NodeList) -> Result<usize, ValidationError> {
    try_validate(expected, actual).into_result()
}

/// Match and report the outcome without short-circuiting the caller.
pub fn try_validate(expected: &NodeList, actual: &NodeList) -> MatchOutcome {
    let expected = expected.visible();
    let actual = actual.visible();

    let patterns = match compile_list(&expected) {
        Ok(patterns) => patterns,
        Err(err) => return MatchOutcome::Failed(err),
    };

    let candidates: Vec<&Node> = actual.iter().collect();
    match place_all(&patterns, &candidates) {
        Ok(()) => MatchOutcome::Matched {
            consumed: patterns.len(),
        },
        Err((witness, reason)) => MatchOutcome::Failed(ValidationError::Mismatch {
            expected: Box::new(patterns[witness].node.clone()),
            reason,
        }),
    }
}

/// Expected node with its comparator derived once for the whole pass.
struct Pattern<'a> {
    node: &'a Node,
    comparator: Comparator,
    children: Vec<Pattern<'a>>,
}

fn compile_list(list: &NodeList) -> Result<Vec<Pattern<'_>>, ValidationError> {
    list.iter().map(compile).collect()
}

fn compile(node: &Node) -> Result<Pattern<'_>, ValidationError> {
    let comparator = if node.has_value() {
        Comparator::for_node(node).map_err(|detail| ValidationError::InvalidDirective {
            node: node.name.clone(),
            detail,
        })?
    } else {
        Comparator::Exact
    };

    Ok(Pattern {
        node,
        comparator,
        children: compile_list(&node.children)?,
    })
}

impl Pattern<'_> {
    fn accepts(&self, candidate: &Node) -> Result<(), Mismatch> {
        let expected = self.node;

        if !expected.name_is(&candidate.name) {
            return Err(Mismatch::NoCandidate);
        }

        match (expected.has_value(), candidate.has_value()) {
            (true, true) => {
                if !self.comparator.accepts(&expected.value, &candidate.value) {
                    return Err(Mismatch::Value {
                        expected: expected.text(),
                        actual: candidate.text(),
                    });
                }
            }
            (false, false) => {}
            (has, _) => return Err(Mismatch::ValuePresence { expected: has }),
        }

        for (key, value) in expected.properties.iter() {
            if is_directive(key) {
                continue;
            }
            match candidate.properties.get_ignore_case(key) {
                Some(actual) if actual.to_lowercase() == value.to_lowercase() => {}
                actual => {
                    return Err(Mismatch::Property {
                        key: key.to_string(),
                        expected: value.to_string(),
                        actual: actual.map(str::to_string),
                    });
                }
            }
        }

        match (self.children.is_empty(), candidate.has_children()) {
            (true, false) => Ok(()),
            (false, true) => {
                let nested: Vec<&Node> = candidate.children.iter().collect();
                place_all(&self.children, &nested).map_err(|(witness, reason)| Mismatch::Child {
                    witness: Box::new(self.children[witness].node.clone()),
                    reason: Box::new(reason),
                })
            }
            (expected_empty, _) => Err(Mismatch::ChildrenPresence {
                expected: !expected_empty,
            }),
        }
    }
}

/// Lazily evaluated compatibility table for one list level.
struct Compatibility<'p, 'a, 'c> {
    patterns: &'p [Pattern<'a>],
    candidates: &'c [&'c Node],
    table: Vec<Vec<OnceCell<bool>>>,
}

impl<'p, 'a, 'c> Compatibility<'p, 'a, 'c> {
    fn new(patterns: &'p [Pattern<'a>], candidates: &'c [&'c Node]) -> Self {
        let table = patterns
            .iter()
            .map(|_| candidates.iter().map(|_| OnceCell::new()).collect())
            .collect();
        Self {
            patterns,
            candidates,
            table,
        }
    }

    fn compatible(&self, pattern: usize, candidate: usize) -> bool {
        *self.table[pattern][candidate]
            .get_or_init(|| self.patterns[pattern].accepts(self.candidates[candidate]).is_ok())
    }

    /// Try to seat `pattern`, displacing earlier placements along alternating paths.
    fn seat(&self, pattern: usize, owner: &mut [Option<usize>], visited: &mut [bool]) -> bool {
        for candidate in 0..self.candidates.len() {
            if visited[candidate] || !self.compatible(pattern, candidate) {
                continue;
            }
            visited[candidate] = true;
            let free = match owner[candidate] {
                None => true,
                Some(other) => self.seat(other, owner, visited),
            };
            if free {
                owner[candidate] = Some(pattern);
                return true;
            }
        }
        false
    }

    fn explain(&self, pattern: usize) -> Mismatch {
        let expected = self.patterns[pattern].node;
        let mut same_named = 0;
        for candidate in self.candidates {
            if !expected.name_is(&candidate.name) {
                continue;
            }
            same_named += 1;
            if let Err(reason) = self.patterns[pattern].accepts(candidate) {
                return reason;
            }
        }
        if same_named == 0 {
            Mismatch::NoCandidate
        } else {
            Mismatch::Exhausted {
                candidates: same_named,
            }
        }
    }
}

/// Place every pattern on a distinct candidate, or return the first pattern
/// (in processing order) that cannot be placed.
fn place_all(patterns: &[Pattern<'_>], candidates: &[&Node]) -> Result<(), (usize, Mismatch)> {
    let table = Compatibility::new(patterns, candidates);
    let mut owner: Vec<Option<usize>> = vec![None; candidates.len()];

    for pattern in (0..patterns.len()).rev() {
        let mut visited = vec![false; candidates.len()];
        if !table.seat(pattern, &mut owner, &mut visited) {
            return Err((pattern, table.explain(pattern)));
        }
    }
    Ok(())
}
